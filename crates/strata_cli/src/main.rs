//! Headless render and snapshot commands.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use strata_renderer::{RenderManager, RenderOptions, SceneDirectory};

#[derive(Parser)]
#[command(name = "strata", about = "Voxel-world path tracer", version)]
struct Cli {
    /// Directory holding scene files (defaults to the current directory).
    #[arg(long, global = true)]
    scene_dir: Option<PathBuf>,

    /// Override the target SPP.
    #[arg(long, global = true)]
    target: Option<u32>,

    /// Number of render threads (default: one per core).
    #[arg(long, global = true, default_value_t = 0)]
    threads: usize,

    /// Render even if the scene loaded with errors.
    #[arg(long, short = 'f', global = true)]
    force: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a scene to its target SPP, saving dumps and snapshots.
    Render {
        /// Scene name (the `<name>.json` in the scene directory).
        scene_name: String,
    },
    /// Load a scene's render dump and write a tonemapped image.
    Snapshot {
        scene_name: String,
        /// Output file; defaults to `<name>-<spp>.<ext>`.
        outfile: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let error_count = Arc::new(AtomicUsize::new(0));
    init_logging(Arc::clone(&error_count));

    let cli = Cli::parse();
    let scene_dir = cli
        .scene_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    let result = match &cli.command {
        Command::Render { scene_name } => {
            do_render(&cli, scene_dir, scene_name, error_count)
        }
        Command::Snapshot {
            scene_name,
            outfile,
        } => do_snapshot(scene_dir, scene_name, outfile.clone()),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

/// Route log records through env_logger while counting errors, so `--force`
/// can decide whether a load was clean.
fn init_logging(error_count: Arc<AtomicUsize>) {
    let logger = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .build();
    let max_level = logger.filter();
    log::set_boxed_logger(Box::new(CountingLogger {
        inner: logger,
        error_count,
    }))
    .expect("logger already installed");
    log::set_max_level(max_level);
}

struct CountingLogger {
    inner: env_logger::Logger,
    error_count: Arc<AtomicUsize>,
}

impl log::Log for CountingLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if record.level() <= log::Level::Error {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.log(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn do_render(
    cli: &Cli,
    scene_dir: PathBuf,
    scene_name: &str,
    error_count: Arc<AtomicUsize>,
) -> Result<ExitCode> {
    let directory = SceneDirectory::new(scene_dir.clone());
    let mut scene = match directory.load_scene(scene_name) {
        Ok(scene) => scene,
        Err(e) => {
            log::error!("failed to load scene {scene_name:?}: {e}");
            return Ok(ExitCode::from(1));
        }
    };

    if error_count.load(Ordering::Relaxed) > 0 && !cli.force {
        log::error!("aborting render due to errors while loading the scene");
        log::error!("run again with --force to render anyway");
        return Ok(ExitCode::from(1));
    }

    if let Some(target) = cli.target {
        scene.spp_target = target;
    }

    let mut manager = RenderManager::new(
        scene,
        RenderOptions {
            threads: cli.threads,
            seed: 0,
            scene_directory: Some(scene_dir.clone()),
        },
    );
    log::info!(
        "rendering {scene_name} with {} threads",
        manager.num_threads()
    );

    manager.set_on_frame_completed(Box::new(|scene, spp| {
        log::info!("frame complete: {spp}/{} spp", scene.spp_target);
    }));
    manager.set_on_render_completed(Box::new(|elapsed_ms, sps| {
        let seconds = elapsed_ms / 1000;
        println!("Render job finished.");
        println!(
            "Total rendering time: {} hours, {} minutes, {} seconds",
            seconds / 3600,
            (seconds / 60) % 60,
            seconds % 60
        );
        println!("Average samples per second (SPS): {sps:.0}");
    }));

    manager.start();
    manager.start_render();
    manager.join();

    // Persist the final state before shutting down.
    let directory = SceneDirectory::new(scene_dir);
    manager.with_scene(|scene| {
        directory
            .save_scene(scene)
            .context("saving final render state")
    })?;
    manager.shutdown();
    Ok(ExitCode::SUCCESS)
}

fn do_snapshot(
    scene_dir: PathBuf,
    scene_name: &str,
    outfile: Option<PathBuf>,
) -> Result<ExitCode> {
    let directory = SceneDirectory::new(scene_dir);
    let mut scene = match directory.load_scene(scene_name) {
        Ok(scene) => scene,
        Err(e) => {
            log::error!("failed to load scene {scene_name:?}: {e}");
            return Ok(ExitCode::from(1));
        }
    };

    match outfile {
        Some(path) => {
            directory
                .save_frame(&mut scene, &path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => {
            let path = directory.save_snapshot(&mut scene).context("writing snapshot")?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}
