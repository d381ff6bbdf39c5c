//! Render scheduler: the worker pool and the pass state machine.
//!
//! One pixel is one job. Each pass, workers claim jobs from an atomic
//! counter, trace one sample per claimed pixel, and accumulate into the
//! sample buffer (one writer per pixel per pass). Workers suspend only
//! between samples; cancellation is cooperative through the pass-epoch
//! counter, re-checked before every buffer write.
//!
//! External control and scene mutation go through the scene RwLock: a
//! writer (stop, pause, parameter change) cannot proceed until every
//! worker has released its pass-long read borrow, so once a control call
//! returns, no in-flight sample writes remain.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use strata_core::{RenderState, Scene};
use strata_math::DVec3;

use crate::path_tracer::trace_path;
use crate::persist::SceneDirectory;
use crate::{camera_ray, post};

use strata_core::rng::gen_f64;

/// Policy hooks deciding when snapshots and dumps are written.
pub trait SnapshotControl: Send + Sync {
    fn should_save_snapshot(&self, scene: &Scene, spp: u32) -> bool;
    fn should_save_dump(&self, scene: &Scene, spp: u32) -> bool;
}

/// Default policy: both follow the scene's dump frequency; snapshots
/// additionally require `save_snapshots`.
pub struct DefaultSnapshotControl;

impl SnapshotControl for DefaultSnapshotControl {
    fn should_save_snapshot(&self, scene: &Scene, spp: u32) -> bool {
        scene.save_snapshots && scene.dump_frequency > 0 && spp % scene.dump_frequency == 0
    }

    fn should_save_dump(&self, scene: &Scene, spp: u32) -> bool {
        scene.dump_frequency > 0 && spp % scene.dump_frequency == 0
    }
}

/// Invoked after every completed pass.
pub type FrameCallback = Box<dyn FnMut(&Scene, u32) + Send>;
/// Invoked once when a render reaches its target or is stopped:
/// (elapsed milliseconds, samples per second).
pub type RenderCompletedCallback = Box<dyn FnMut(u64, f64) + Send>;

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Worker count; 0 means one per core.
    pub threads: usize,
    /// Base RNG seed, mixed with the pass epoch and worker id.
    pub seed: u64,
    /// Scene directory for dumps and snapshots; None disables persistence.
    pub scene_directory: Option<PathBuf>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            seed: 0,
            scene_directory: None,
        }
    }
}

struct PoolState {
    /// Epoch workers should run; kept equal to `Shared::epoch` while a
    /// pass is live.
    pass_epoch: u64,
    total_jobs: u32,
    shutdown: bool,
    /// Set once per render session when the target is reached or the
    /// render is stopped.
    completed: bool,
}

struct Shared {
    scene: RwLock<Scene>,
    pool: Mutex<PoolState>,
    worker_cv: Condvar,
    manager_cv: Condvar,
    job_counter: AtomicU32,
    jobs_done: AtomicU32,
    /// Monotonic pass epoch; bumping it invalidates the current pass.
    epoch: AtomicU64,
    seed: u64,
}

struct Callbacks {
    on_frame_completed: Option<FrameCallback>,
    on_render_completed: Option<RenderCompletedCallback>,
    snapshot_control: Box<dyn SnapshotControl>,
}

/// Owns the worker pool and drives the render-state machine.
pub struct RenderManager {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
    manager: Option<thread::JoinHandle<()>>,
    callbacks: Arc<Mutex<Callbacks>>,
    scene_directory: Option<PathBuf>,
    num_threads: usize,
}

impl RenderManager {
    pub fn new(scene: Scene, options: RenderOptions) -> Self {
        let num_threads = if options.threads == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            options.threads
        }
        .max(1);

        let shared = Arc::new(Shared {
            scene: RwLock::new(scene),
            pool: Mutex::new(PoolState {
                pass_epoch: 0,
                total_jobs: 0,
                shutdown: false,
                completed: false,
            }),
            worker_cv: Condvar::new(),
            manager_cv: Condvar::new(),
            job_counter: AtomicU32::new(0),
            jobs_done: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
            seed: options.seed,
        });
        let callbacks = Arc::new(Mutex::new(Callbacks {
            on_frame_completed: None,
            on_render_completed: None,
            snapshot_control: Box::new(DefaultSnapshotControl),
        }));

        let workers = (0..num_threads)
            .map(|id| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("render-worker-{id}"))
                    .spawn(move || worker_loop(shared, id))
                    .expect("spawn render worker")
            })
            .collect();

        Self {
            shared,
            workers,
            manager: None,
            callbacks,
            scene_directory: options.scene_directory,
            num_threads,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn set_on_frame_completed(&self, callback: FrameCallback) {
        self.callbacks.lock().unwrap().on_frame_completed = Some(callback);
    }

    pub fn set_on_render_completed(&self, callback: RenderCompletedCallback) {
        self.callbacks.lock().unwrap().on_render_completed = Some(callback);
    }

    pub fn set_snapshot_control(&self, control: Box<dyn SnapshotControl>) {
        self.callbacks.lock().unwrap().snapshot_control = control;
    }

    /// Run a closure with shared access to the scene.
    pub fn with_scene<T>(&self, f: impl FnOnce(&Scene) -> T) -> T {
        f(&self.shared.scene.read().unwrap())
    }

    /// Run a mutation under the scene lock. Acquiring the write lock
    /// drains all in-flight workers first, so no sample write can race
    /// with the mutation or land after it.
    pub fn with_scene_mut<T>(&self, f: impl FnOnce(&mut Scene) -> T) -> T {
        self.cancel_pass();
        let result = f(&mut self.shared.scene.write().unwrap());
        self.shared.manager_cv.notify_all();
        self.shared.worker_cv.notify_all();
        result
    }

    /// Start (or resume) rendering.
    pub fn start_render(&self) {
        self.with_scene_mut(|scene| scene.start_render());
        self.clear_completed();
    }

    pub fn pause_render(&self) {
        self.with_scene_mut(|scene| scene.pause_render());
    }

    /// Stop rendering and return to preview. When this returns, no worker
    /// will write to the sample buffer until the next start.
    pub fn stop_render(&self) {
        self.with_scene_mut(|scene| scene.stop_render());
    }

    fn cancel_pass(&self) {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
    }

    fn clear_completed(&self) {
        self.shared.pool.lock().unwrap().completed = false;
        self.shared.manager_cv.notify_all();
    }

    /// Spawn the manager thread driving passes.
    pub fn start(&mut self) {
        if self.manager.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let callbacks = Arc::clone(&self.callbacks);
        let scene_directory = self.scene_directory.clone();
        self.manager = Some(
            thread::Builder::new()
                .name("render-manager".to_string())
                .spawn(move || manager_loop(shared, callbacks, scene_directory))
                .expect("spawn render manager"),
        );
    }

    /// Block until the current render session completes (target reached or
    /// stopped).
    pub fn join(&self) {
        let mut pool = self.shared.pool.lock().unwrap();
        while !pool.completed && !pool.shutdown {
            let (p, _) = self
                .shared
                .manager_cv
                .wait_timeout(pool, Duration::from_millis(200))
                .unwrap();
            pool = p;
        }
    }

    /// Shut down the pool and the manager thread.
    pub fn shutdown(&mut self) {
        {
            let mut pool = self.shared.pool.lock().unwrap();
            pool.shutdown = true;
        }
        self.cancel_pass();
        self.shared.worker_cv.notify_all();
        self.shared.manager_cv.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(manager) = self.manager.take() {
            let _ = manager.join();
        }
    }
}

impl Drop for RenderManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn manager_loop(
    shared: Arc<Shared>,
    callbacks: Arc<Mutex<Callbacks>>,
    scene_directory: Option<PathBuf>,
) {
    let directory = scene_directory.map(SceneDirectory::new);
    let mut session_start: Option<Instant> = None;
    let mut session_samples: u64 = 0;

    loop {
        if shared.pool.lock().unwrap().shutdown {
            return;
        }

        // Read the control state in one lock acquisition so a concurrent
        // start/stop is seen with its reset flag.
        let (needs_reset, mode, spp, target) = {
            let scene = shared.scene.read().unwrap();
            (
                scene.should_refresh() || scene.force_reset(),
                scene.mode(),
                scene.spp,
                scene.spp_target,
            )
        };

        if needs_reset {
            let mut scene = shared.scene.write().unwrap();
            log::info!("render reset ({:?})", scene.reset_reason());
            scene.apply_reset();
            session_start = None;
            session_samples = 0;
            continue;
        }

        if mode != RenderState::Rendering {
            if session_start.take().is_some() {
                // Stopped mid-session.
                finish_session(&shared, &callbacks, session_samples);
                session_samples = 0;
            }
            let pool = shared.pool.lock().unwrap();
            let _ = shared
                .manager_cv
                .wait_timeout(pool, Duration::from_millis(100))
                .unwrap();
            continue;
        }

        if spp >= target {
            {
                let mut scene = shared.scene.write().unwrap();
                scene.target_reached();
            }
            finish_session(&shared, &callbacks, session_samples);
            session_start = None;
            session_samples = 0;
            continue;
        }

        if session_start.is_none() {
            session_start = Some(Instant::now());
        }

        // Run one sample pass.
        let pass_start = Instant::now();
        let (pass_epoch, total_jobs) = {
            let mut pool = shared.pool.lock().unwrap();
            let scene = shared.scene.read().unwrap();
            let total = scene.width() * scene.height();
            let epoch = shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            shared.job_counter.store(0, Ordering::Relaxed);
            shared.jobs_done.store(0, Ordering::Relaxed);
            pool.pass_epoch = epoch;
            pool.total_jobs = total;
            shared.worker_cv.notify_all();
            (epoch, total)
        };

        // Wait for the pass to finish or be canceled.
        let completed = {
            let mut pool = shared.pool.lock().unwrap();
            loop {
                if pool.shutdown {
                    return;
                }
                let done = shared.jobs_done.load(Ordering::Acquire);
                if done >= total_jobs {
                    break true;
                }
                if shared.epoch.load(Ordering::Acquire) != pass_epoch {
                    break false;
                }
                let (p, _) = shared
                    .manager_cv
                    .wait_timeout(pool, Duration::from_millis(50))
                    .unwrap();
                pool = p;
            }
        };

        if !completed {
            continue;
        }

        // All accumulator writes for this pass happen-before this point:
        // the jobs-done counter is Release on the worker side.
        let elapsed = pass_start.elapsed();
        let new_spp = {
            let mut scene = shared.scene.write().unwrap();
            scene.spp += 1;
            scene.render_time_ms += elapsed.as_millis() as u64;
            session_samples += total_jobs as u64;
            post::finalize_frame(&mut scene);
            scene.spp
        };

        let mut cb = callbacks.lock().unwrap();
        {
            let scene = shared.scene.read().unwrap();
            if let Some(on_frame) = cb.on_frame_completed.as_mut() {
                on_frame(&scene, new_spp);
            }
        }
        let save_snapshot;
        let save_dump;
        {
            let scene = shared.scene.read().unwrap();
            save_snapshot = cb.snapshot_control.should_save_snapshot(&scene, new_spp);
            save_dump = cb.snapshot_control.should_save_dump(&scene, new_spp);
        }
        drop(cb);

        if let Some(directory) = &directory {
            if save_snapshot || save_dump {
                let mut scene = shared.scene.write().unwrap();
                if save_snapshot {
                    if let Err(e) = directory.save_snapshot(&mut scene) {
                        log::warn!("failed to save snapshot: {e}");
                    }
                }
                if save_dump {
                    if let Err(e) = directory.save_dump(&scene) {
                        log::warn!("failed to save render dump: {e}");
                    }
                }
            }
        }
    }
}

fn finish_session(shared: &Arc<Shared>, callbacks: &Arc<Mutex<Callbacks>>, samples: u64) {
    let (elapsed_ms, sps) = {
        let scene = shared.scene.read().unwrap();
        let ms = scene.render_time_ms;
        let sps = if ms > 0 {
            samples as f64 / (ms as f64 / 1000.0)
        } else {
            0.0
        };
        (ms, sps)
    };
    if let Some(on_completed) = callbacks.lock().unwrap().on_render_completed.as_mut() {
        on_completed(elapsed_ms, sps);
    }
    let mut pool = shared.pool.lock().unwrap();
    pool.completed = true;
    shared.manager_cv.notify_all();
}

fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    let mut my_epoch = 0u64;
    loop {
        // Wait for a new pass or shutdown; workers only suspend here,
        // between samples.
        let total_jobs = {
            let mut pool = shared.pool.lock().unwrap();
            loop {
                if pool.shutdown {
                    return;
                }
                if pool.pass_epoch > my_epoch
                    && shared.epoch.load(Ordering::Acquire) == pool.pass_epoch
                {
                    my_epoch = pool.pass_epoch;
                    break pool.total_jobs;
                }
                pool = shared.worker_cv.wait(pool).unwrap();
            }
        };

        {
            // Hold the read borrow for the whole pass; external mutators
            // block on the write lock until we are done.
            let scene = shared.scene.read().unwrap();
            let width = scene.width();
            let mut rng =
                StdRng::seed_from_u64(shared.seed ^ (my_epoch << 16) ^ worker_id as u64);

            loop {
                if shared.epoch.load(Ordering::Acquire) != my_epoch {
                    break;
                }
                let job = shared.job_counter.fetch_add(1, Ordering::Relaxed);
                if job >= total_jobs {
                    break;
                }
                let x = job % width;
                let y = job / width;
                let sample = sample_pixel(&scene, x, y, &mut rng);

                // The write barrier: never write into a canceled pass.
                if shared.epoch.load(Ordering::Acquire) != my_epoch {
                    break;
                }
                scene.sample_buffer().add_sample(x, y, sample);
                shared.jobs_done.fetch_add(1, Ordering::Release);
            }
        }

        let _pool = shared.pool.lock().unwrap();
        shared.manager_cv.notify_all();
    }
}

/// Trace one sample through a pixel: jittered position on the image plane,
/// projected through the camera, traced through the scene.
pub fn sample_pixel(scene: &Scene, x: u32, y: u32, rng: &mut dyn RngCore) -> DVec3 {
    let width = scene.width() as f64;
    let height = scene.height() as f64;
    let half_width = width / (2.0 * height);
    let inv_height = 1.0 / height;

    let u = -half_width + (x as f64 + gen_f64(rng)) * inv_height;
    let v = -0.5 + (y as f64 + gen_f64(rng)) * inv_height;

    let ray = camera_ray(scene, u, v, rng);
    trace_path(scene, ray, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::material::Material;
    use strata_core::{Implementation, Octree, Palette, Region, ResetReason};
    use strata_math::DVec3;

    fn small_scene(spp_target: u32) -> Scene {
        let mut scene = Scene::new("pool");
        scene.set_canvas_size(20, 20);
        scene.spp_target = spp_target;
        scene.ray_depth = 2;
        let mut palette = Palette::new();
        let stone = palette.push(Material::block("stone", DVec3::splat(0.5)));
        let mut solid = Octree::new(Implementation::Packed, 3);
        let water = Octree::new(Implementation::Packed, 3);
        for x in 0..8 {
            for z in 0..8 {
                solid.set(stone, x, 0, z).unwrap();
            }
        }
        scene.set_geometry(
            palette,
            solid,
            water,
            [0; 3],
            Some(Region::new([0, 0, 0], [8, 8, 8])),
        );
        scene.apply_reset();
        scene
    }

    #[test]
    fn test_render_to_target_and_sample_conservation() {
        let scene = small_scene(3);
        let mut manager = RenderManager::new(
            scene,
            RenderOptions {
                threads: 2,
                seed: 7,
                scene_directory: None,
            },
        );
        manager.start();
        manager.start_render();
        manager.join();

        manager.with_scene(|scene| {
            assert_eq!(scene.mode(), RenderState::Paused);
            assert_eq!(scene.spp, 3);
            // Every pixel received exactly spp samples.
            assert_eq!(
                scene.sample_buffer().total_spp(),
                3 * scene.width() as u64 * scene.height() as u64
            );
        });
        manager.shutdown();
    }

    #[test]
    fn test_frame_callback_fires_per_pass() {
        let scene = small_scene(4);
        let mut manager =
            RenderManager::new(scene, RenderOptions { threads: 1, ..Default::default() });
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);
        manager.set_on_frame_completed(Box::new(move |_, spp| {
            sink.lock().unwrap().push(spp);
        }));
        manager.start();
        manager.start_render();
        manager.join();
        manager.shutdown();

        assert_eq!(*frames.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_stop_render_blocks_further_writes() {
        let scene = small_scene(1_000_000);
        let mut manager =
            RenderManager::new(scene, RenderOptions { threads: 2, ..Default::default() });
        manager.start();
        manager.start_render();
        // Let some passes run.
        thread::sleep(Duration::from_millis(150));
        manager.stop_render();

        // Write-barrier probe: the buffer must not change after stop.
        let before = manager.with_scene(|scene| scene.sample_buffer().total_spp());
        thread::sleep(Duration::from_millis(150));
        let after = manager.with_scene(|scene| scene.sample_buffer().total_spp());
        // The manager consumes the forced reset, so the buffer is zeroed;
        // either way it must not have grown.
        assert!(after <= before, "buffer grew after stop: {before} -> {after}");
        manager.with_scene(|scene| assert_eq!(scene.mode(), RenderState::Preview));
        manager.shutdown();
    }

    #[test]
    fn test_pause_and_resume_preserves_progress() {
        let scene = small_scene(1_000_000);
        let mut manager =
            RenderManager::new(scene, RenderOptions { threads: 1, ..Default::default() });
        manager.start();
        manager.start_render();
        // Wait for some progress.
        let mut spp = 0;
        for _ in 0..100 {
            spp = manager.with_scene(|scene| scene.spp);
            if spp >= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(spp >= 2, "no render progress");

        manager.pause_render();
        let paused_spp = manager.with_scene(|scene| scene.spp);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(manager.with_scene(|scene| scene.spp), paused_spp);

        // Resume without a reset.
        manager.start_render();
        thread::sleep(Duration::from_millis(200));
        assert!(manager.with_scene(|scene| scene.spp) >= paused_spp);
        manager.shutdown();
    }

    #[test]
    fn test_mutation_mid_render_resets_progress() {
        let scene = small_scene(1_000_000);
        let mut manager =
            RenderManager::new(scene, RenderOptions { threads: 2, ..Default::default() });
        manager.start();
        manager.start_render();
        for _ in 0..100 {
            if manager.with_scene(|scene| scene.spp) >= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }

        manager.with_scene_mut(|scene| scene.set_fov(90.0));
        manager.with_scene(|scene| {
            assert_eq!(scene.reset_reason(), ResetReason::SettingsChanged)
        });
        // The manager consumes the reset and starts over.
        for _ in 0..100 {
            let (spp, pending) =
                manager.with_scene(|scene| (scene.spp, scene.should_refresh()));
            if !pending && spp <= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        manager.with_scene(|scene| assert!(!scene.should_refresh()));
        manager.shutdown();
    }

    #[test]
    fn test_single_thread_deterministic() {
        let run = || {
            let scene = small_scene(2);
            let mut manager = RenderManager::new(
                scene,
                RenderOptions {
                    threads: 1,
                    seed: 42,
                    scene_directory: None,
                },
            );
            manager.start();
            manager.start_render();
            manager.join();
            let value = manager.with_scene(|scene| scene.sample_buffer().get(10, 10));
            manager.shutdown();
            value
        };
        assert_eq!(run(), run());
    }
}
