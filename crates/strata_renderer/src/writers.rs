//! Image output: PNG (8-bit sRGB), TIFF-32 (float), PFM (float).

use std::io::{self, Cursor, Seek, Write};

use thiserror::Error;

use strata_core::{OutputMode, ProjectionMode, Scene};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("PNG encoding failed: {0}")]
    Png(#[from] png::EncodingError),
    #[error("TIFF encoding failed: {0}")]
    Tiff(#[from] tiff::TiffError),
}

/// Write the current frame in the given output mode.
pub fn write_image<W: Write>(out: &mut W, scene: &Scene, mode: OutputMode) -> Result<(), WriteError> {
    match mode {
        OutputMode::Png => write_png(out, scene),
        OutputMode::Tiff32 => write_tiff32(out, scene),
        OutputMode::Pfm => write_pfm(out, scene),
    }
}

/// 8-bit sRGB PNG from the finalized preview buffer. Adds an alpha channel
/// when transparent sky is enabled, and a GPano XMP chunk for panoramic
/// cameras around 180 degrees.
pub fn write_png<W: Write>(out: &mut W, scene: &Scene) -> Result<(), WriteError> {
    let width = scene.width();
    let height = scene.height();
    let front = scene.preview().front();
    let alpha = scene.alpha_channel();
    let with_alpha = scene.transparent_sky;

    let mut encoder = png::Encoder::new(out, width, height);
    encoder.set_color(if with_alpha {
        png::ColorType::Rgba
    } else {
        png::ColorType::Rgb
    });
    encoder.set_depth(png::BitDepth::Eight);
    if panoramic_xmp_applies(scene) {
        encoder.add_itxt_chunk("XML:com.adobe.xmp".to_string(), gpano_xmp(width, height))?;
    }

    let channels = if with_alpha { 4 } else { 3 };
    let mut data = Vec::with_capacity((width * height) as usize * channels);
    for (i, argb) in front.iter().enumerate() {
        data.push((argb >> 16) as u8);
        data.push((argb >> 8) as u8);
        data.push(*argb as u8);
        if with_alpha {
            data.push(alpha[i]);
        }
    }

    let mut writer = encoder.write_header()?;
    writer.write_image_data(&data)?;
    writer.finish()?;
    Ok(())
}

fn panoramic_xmp_applies(scene: &Scene) -> bool {
    scene.camera.projection == ProjectionMode::Panoramic
        && (179.0..=181.0).contains(&scene.camera.fov)
}

fn gpano_xmp(width: u32, height: u32) -> String {
    format!(
        "<rdf:RDF xmlns:rdf='http://www.w3.org/1999/02/22-rdf-syntax-ns#'>\n \
         <rdf:Description rdf:about=''\n   \
         xmlns:GPano='http://ns.google.com/photos/1.0/panorama/'>\n \
         <GPano:CroppedAreaImageHeightPixels>{height}</GPano:CroppedAreaImageHeightPixels>\n \
         <GPano:CroppedAreaImageWidthPixels>{width}</GPano:CroppedAreaImageWidthPixels>\n \
         <GPano:CroppedAreaLeftPixels>0</GPano:CroppedAreaLeftPixels>\n \
         <GPano:CroppedAreaTopPixels>0</GPano:CroppedAreaTopPixels>\n \
         <GPano:FullPanoHeightPixels>{height}</GPano:FullPanoHeightPixels>\n \
         <GPano:FullPanoWidthPixels>{width}</GPano:FullPanoWidthPixels>\n \
         <GPano:ProjectionType>equirectangular</GPano:ProjectionType>\n \
         <GPano:UsePanoramaViewer>True</GPano:UsePanoramaViewer>\n \
         </rdf:Description>\n </rdf:RDF>"
    )
}

/// Linear radiance per channel, exposure applied.
fn linear_frame(scene: &Scene) -> Vec<f32> {
    let width = scene.width();
    let height = scene.height();
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            let c = scene.sample_buffer().mean(x, y) * scene.exposure;
            data.push(c.x as f32);
            data.push(c.y as f32);
            data.push(c.z as f32);
        }
    }
    data
}

/// 3-channel IEEE-754 32-bit float TIFF, linear radiance.
pub fn write_tiff32<W: Write>(out: &mut W, scene: &Scene) -> Result<(), WriteError> {
    let data = linear_frame(scene);
    // The TIFF encoder needs a seekable sink.
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = tiff::encoder::TiffEncoder::new(&mut cursor)?;
        encoder.write_image::<tiff::encoder::colortype::RGB32Float>(
            scene.width(),
            scene.height(),
            &data,
        )?;
    }
    cursor.rewind()?;
    out.write_all(cursor.get_ref())?;
    Ok(())
}

/// Portable FloatMap: `PF\n<w> <h>\n-1.0\n`, then f32 RGB triples in
/// bottom-up row order. The negative scale marks little-endian data.
pub fn write_pfm<W: Write>(out: &mut W, scene: &Scene) -> Result<(), WriteError> {
    let width = scene.width();
    let height = scene.height();
    let data = linear_frame(scene);

    write!(out, "PF\n{width} {height}\n-1.0\n")?;
    for y in (0..height).rev() {
        let row_start = (y * width * 3) as usize;
        for value in &data[row_start..row_start + (width * 3) as usize] {
            out.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}
