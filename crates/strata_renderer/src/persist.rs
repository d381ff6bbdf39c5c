//! Scene-directory persistence.
//!
//! A scene named `n` stores, in its directory: `n.json` (scene
//! description), `n.dump` (+ `.backup`), `n.octree2` (gzipped octrees,
//! palette, and tint maps), `n.emittergrid`, `n.foliage`, `n.grass`, and
//! snapshots under `snapshots/`.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

use strata_core::{
    EmitterGrid, EmitterSamplingStrategy, Implementation, Octree, OctreeError, Palette,
    RenderState, Scene, SceneDescription, WorldTexture,
};

use crate::dump::{DumpError, RenderDump};
use crate::post;
use crate::writers::{self, WriteError};

/// Version tag of the `.octree2` container.
const OCTREE_FILE_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("scene description error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Dump(#[from] DumpError),
    #[error(transparent)]
    Octree(#[from] OctreeError),
    #[error(transparent)]
    Image(#[from] WriteError),
}

/// Handle to one scene directory.
pub struct SceneDirectory {
    dir: PathBuf,
}

impl SceneDirectory {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn scene_file(&self, name: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{name}{extension}"))
    }

    // ------------------------------------------------------------------
    // Whole-scene save / load

    /// Save the description, octrees, render dump, and emitter grid.
    pub fn save_scene(&self, scene: &Scene) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir)?;

        let description = SceneDescription::from_scene(scene);
        let json_path = self.scene_file(&scene.name, ".json");
        backup_file(&json_path);
        fs::write(&json_path, description.to_json()?)?;

        self.save_octree(scene)?;
        self.save_dump(scene)?;
        self.save_emitter_grid(scene)?;
        self.save_tint_maps(scene)?;
        Ok(())
    }

    /// Load a stored scene by name. Octree or dump failures degrade to a
    /// fresh buffer; a missing or corrupt description is an error.
    pub fn load_scene(&self, name: &str) -> Result<Scene, PersistError> {
        let json = fs::read_to_string(self.scene_file(name, ".json"))?;
        let description = SceneDescription::from_json(&json)?;

        let mut scene = Scene::new(name);
        description.apply(&mut scene);
        scene.name = name.to_string();

        if let Err(e) = self.load_octree(&mut scene) {
            log::warn!("could not load octree data: {e}");
        }

        if scene.emitter_sampling != EmitterSamplingStrategy::None
            && !self.load_emitter_grid(&mut scene)
        {
            scene.rebuild_emitter_grid();
        }
        self.load_tint_maps(&mut scene);

        if self.load_dump(&mut scene) {
            post::finalize_frame(&mut scene);
        } else {
            scene.spp = 0;
            scene.render_time_ms = 0;
        }

        if scene.spp == 0 {
            scene.set_mode(RenderState::Preview);
        } else if scene.mode() == RenderState::Rendering {
            scene.set_mode(RenderState::Paused);
        }
        Ok(scene)
    }

    // ------------------------------------------------------------------
    // Render dump

    /// Write `<name>.dump` atomically, preserving the previous dump as
    /// `<name>.dump.backup`.
    pub fn save_dump(&self, scene: &Scene) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir)?;
        let dump = RenderDump::from_scene(scene);
        let path = self.scene_file(&scene.name, ".dump");
        let tmp = self.scene_file(&scene.name, ".dump.tmp");

        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            dump.write(&mut out)?;
            out.flush()?;
        }
        backup_file(&path);
        fs::rename(&tmp, &path)?;
        log::info!("render dump saved: {}", path.display());
        Ok(())
    }

    /// Load `<name>.dump`, falling back to the backup. Returns false when
    /// neither loads; the caller zeroes the progress counters.
    pub fn load_dump(&self, scene: &mut Scene) -> bool {
        for extension in [".dump", ".dump.backup"] {
            let path = self.scene_file(&scene.name, extension);
            match try_load_dump(&path, scene) {
                Ok(true) => {
                    log::info!("render dump loaded: {}", path.display());
                    return true;
                }
                Ok(false) => {}
                Err(e) => log::warn!("failed to load render dump {}: {e}", path.display()),
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Octrees

    /// Write `<name>.octree2`: a gzip stream with the palette, both
    /// octrees, and the tint maps.
    pub fn save_octree(&self, scene: &Scene) -> Result<(), PersistError> {
        let path = self.scene_file(&scene.name, ".octree2");
        let mut out = GzEncoder::new(BufWriter::new(File::create(&path)?), Compression::fast());
        out.write_all(&OCTREE_FILE_VERSION.to_be_bytes())?;
        scene.palette().store(&mut out)?;
        scene.solid_octree().store(&mut out)?;
        scene.water_octree().store(&mut out)?;
        scene.grass_texture.store(&mut out)?;
        scene.foliage_texture.store(&mut out)?;
        scene.water_texture.store(&mut out)?;
        out.finish()?.flush()?;
        log::info!("octree saved: {}", path.display());
        Ok(())
    }

    /// Load `<name>.octree2` with the configured octree implementation,
    /// falling back to the node variant when the packed one overflows.
    pub fn load_octree(&self, scene: &mut Scene) -> Result<(), PersistError> {
        let implementation = scene.octree_implementation;
        match self.load_octree_with(scene, implementation) {
            Err(PersistError::Octree(OctreeError::TooBig))
                if implementation == Implementation::Packed =>
            {
                log::warn!(
                    "octree too big for the packed implementation; retrying with node storage"
                );
                self.load_octree_with(scene, Implementation::Node)
            }
            other => other,
        }
    }

    fn load_octree_with(
        &self,
        scene: &mut Scene,
        implementation: Implementation,
    ) -> Result<(), PersistError> {
        let path = self.scene_file(&scene.name, ".octree2");
        let mut input = GzDecoder::new(BufReader::new(File::open(&path)?));

        let mut buf = [0u8; 4];
        io::Read::read_exact(&mut input, &mut buf)?;
        let version = u32::from_be_bytes(buf);
        if version != OCTREE_FILE_VERSION {
            return Err(PersistError::Octree(OctreeError::Corrupt(format!(
                "unsupported octree file version {version}"
            ))));
        }

        let palette = Palette::load(&mut input)?;
        let solid = Octree::load(&mut input, implementation)?;
        let water = Octree::load(&mut input, implementation)?;
        scene.grass_texture = WorldTexture::load(&mut input)?;
        scene.foliage_texture = WorldTexture::load(&mut input)?;
        scene.water_texture = WorldTexture::load(&mut input)?;

        let origin = scene.origin();
        let region = scene.loaded_region();
        scene.set_geometry(palette, solid, water, origin, region);
        log::info!("octree loaded: {}", path.display());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Emitter grid and tint maps

    pub fn save_emitter_grid(&self, scene: &Scene) -> Result<(), PersistError> {
        let Some(grid) = scene.emitter_grid() else {
            return Ok(());
        };
        let path = self.scene_file(&scene.name, ".emittergrid");
        let mut out = GzEncoder::new(BufWriter::new(File::create(&path)?), Compression::fast());
        grid.store(&mut out)?;
        out.finish()?.flush()?;
        Ok(())
    }

    pub fn load_emitter_grid(&self, scene: &mut Scene) -> bool {
        let path = self.scene_file(&scene.name, ".emittergrid");
        let result = File::open(&path)
            .map_err(PersistError::from)
            .and_then(|file| {
                let mut input = GzDecoder::new(BufReader::new(file));
                EmitterGrid::load(&mut input).map_err(PersistError::from)
            });
        match result {
            Ok(grid) => {
                scene.set_emitter_grid(Some(grid));
                true
            }
            Err(e) => {
                log::info!("could not load emitter grid: {e}");
                false
            }
        }
    }

    fn save_tint_maps(&self, scene: &Scene) -> Result<(), PersistError> {
        for (extension, texture) in [
            (".foliage", &scene.foliage_texture),
            (".grass", &scene.grass_texture),
        ] {
            let path = self.scene_file(&scene.name, extension);
            let mut out =
                GzEncoder::new(BufWriter::new(File::create(&path)?), Compression::fast());
            texture.store(&mut out)?;
            out.finish()?.flush()?;
        }
        Ok(())
    }

    fn load_tint_maps(&self, scene: &mut Scene) {
        for extension in [".foliage", ".grass"] {
            let path = self.scene_file(&scene.name, extension);
            let Ok(file) = File::open(&path) else {
                continue;
            };
            let mut input = GzDecoder::new(BufReader::new(file));
            match WorldTexture::load(&mut input) {
                Ok(texture) if extension == ".foliage" => scene.foliage_texture = texture,
                Ok(texture) => scene.grass_texture = texture,
                Err(e) => log::info!("could not load {}: {e}", path.display()),
            }
        }
    }

    // ------------------------------------------------------------------
    // Snapshots

    /// Write a `<name>-<spp>.<ext>` snapshot under `snapshots/`.
    pub fn save_snapshot(&self, scene: &mut Scene) -> Result<PathBuf, PersistError> {
        let directory = self.dir.join("snapshots");
        fs::create_dir_all(&directory)?;
        let file_name = format!(
            "{}-{}{}",
            scene.name,
            scene.spp,
            scene.output_mode.extension()
        );
        let path = directory.join(file_name);

        post::compute_alpha(scene);
        post::finalize_frame(scene);
        let mut out = BufWriter::new(File::create(&path)?);
        writers::write_image(&mut out, scene, scene.output_mode)?;
        out.flush()?;
        log::info!("snapshot saved: {}", path.display());
        Ok(path)
    }

    /// Write the current frame to an explicit file.
    pub fn save_frame(&self, scene: &mut Scene, path: &Path) -> Result<(), PersistError> {
        post::compute_alpha(scene);
        post::finalize_frame(scene);
        let mut out = BufWriter::new(File::create(path)?);
        writers::write_image(&mut out, scene, scene.output_mode)?;
        out.flush()?;
        Ok(())
    }
}

/// Load one dump file into the scene; Ok(false) when the file is absent.
fn try_load_dump(path: &Path, scene: &mut Scene) -> Result<bool, PersistError> {
    if !path.is_file() {
        return Ok(false);
    }
    let mut input = BufReader::new(File::open(path)?);
    let dump = RenderDump::read(&mut input)?;
    dump.apply(scene)?;
    Ok(true)
}

/// Rename `file` to `file.backup`, replacing any previous backup. Failure
/// to create a backup is not an error.
fn backup_file(path: &Path) {
    if !path.exists() {
        return;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let backup = path.with_file_name(format!("{name}.backup"));
    if let Err(e) = fs::rename(path, &backup) {
        log::info!("could not create backup {}: {e}", backup.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::material::Material;
    use strata_core::Region;
    use strata_math::DVec3;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "strata-persist-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn populated_scene(name: &str) -> Scene {
        let mut scene = Scene::new(name);
        scene.set_canvas_size(24, 20);
        let mut palette = Palette::new();
        let stone = palette.push(Material::block("stone", DVec3::splat(0.5)));
        let mut solid = Octree::new(Implementation::Packed, 3);
        let water = Octree::new(Implementation::Packed, 3);
        solid.set(stone, 1, 2, 3).unwrap();
        scene.set_geometry(
            palette,
            solid,
            water,
            [0; 3],
            Some(Region::new([0, 0, 0], [8, 8, 8])),
        );
        scene
    }

    #[test]
    fn test_scene_roundtrip() {
        let dir = temp_dir("roundtrip");
        let directory = SceneDirectory::new(dir.clone());

        let mut scene = populated_scene("alpha");
        scene.sample_buffer().add_sample(5, 5, DVec3::new(1.0, 2.0, 3.0));
        scene.spp = 1;
        scene.render_time_ms = 99;
        directory.save_scene(&scene).unwrap();

        let loaded = directory.load_scene("alpha").unwrap();
        assert_eq!(loaded.width(), 24);
        assert_eq!(loaded.spp, 1);
        assert_eq!(loaded.render_time_ms, 99);
        let stone = loaded.palette().id_of("stone").unwrap();
        assert_eq!(loaded.solid_octree().get_type(1, 2, 3), stone);
        // Per-pixel data survives; dump restore gives a uniform SPP.
        assert_eq!(loaded.sample_buffer().get(5, 5), DVec3::new(1.0, 2.0, 3.0));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_dump_backup_preserved() {
        let dir = temp_dir("backup");
        let directory = SceneDirectory::new(dir.clone());

        let mut scene = populated_scene("beta");
        scene.sample_buffer().add_sample(0, 0, DVec3::ONE);
        scene.spp = 1;
        directory.save_dump(&scene).unwrap();

        scene.sample_buffer().add_sample(0, 0, DVec3::ONE);
        scene.spp = 2;
        directory.save_dump(&scene).unwrap();

        assert!(directory.scene_file("beta", ".dump").is_file());
        assert!(directory.scene_file("beta", ".dump.backup").is_file());

        // The backup holds the older state.
        let mut input =
            BufReader::new(File::open(directory.scene_file("beta", ".dump.backup")).unwrap());
        let backup = RenderDump::read(&mut input).unwrap();
        assert_eq!(backup.spp, 1);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_load_falls_back_to_backup() {
        let dir = temp_dir("fallback");
        let directory = SceneDirectory::new(dir.clone());

        let mut scene = populated_scene("gamma");
        scene.sample_buffer().add_sample(0, 0, DVec3::ONE);
        scene.spp = 7;
        directory.save_dump(&scene).unwrap();
        // Corrupt the primary dump; keep it recognizable as versioned.
        fs::rename(
            directory.scene_file("gamma", ".dump"),
            directory.scene_file("gamma", ".dump.backup"),
        )
        .unwrap();
        fs::write(directory.scene_file("gamma", ".dump"), b"DUMPgarbage").unwrap();

        let mut fresh = populated_scene("gamma");
        assert!(directory.load_dump(&mut fresh));
        assert_eq!(fresh.spp, 7);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_dump_reports_false() {
        let dir = temp_dir("missing");
        let directory = SceneDirectory::new(dir.clone());
        let mut scene = populated_scene("delta");
        assert!(!directory.load_dump(&mut scene));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_snapshot_naming() {
        let dir = temp_dir("snapshot");
        let directory = SceneDirectory::new(dir.clone());
        let mut scene = populated_scene("epsilon");
        scene.spp = 128;
        let path = directory.save_snapshot(&mut scene).unwrap();
        assert!(path.ends_with("snapshots/epsilon-128.png"));
        assert!(path.is_file());
        fs::remove_dir_all(dir).unwrap();
    }
}
