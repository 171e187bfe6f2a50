//! pathview CLI - headless progressive renderer for OBJ scenes.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use pathview::prelude::*;

/// Command-line options. Unset values fall back to [`Settings`].
#[derive(Debug, Default)]
struct Options {
    path: Option<PathBuf>,
    file: Option<PathBuf>,
    output: Option<PathBuf>,
    frames: Option<u32>,
    bounces: Option<u32>,
    samples: Option<u32>,
    environment: Option<PathBuf>,
    background: Option<PathBuf>,
    env_multiplier: Option<f32>,
    device: Option<DeviceMode>,
    cpu_devices: Option<usize>,
    width: Option<u32>,
    height: Option<u32>,
    eye: [Option<f32>; 3],
    target: [Option<f32>; 3],
    aperture: Option<f32>,
    focus_distance: Option<f32>,
    focal_length: Option<f32>,
    camera_speed: Option<f32>,
    camera_path: Vec<CameraMove>,
    benchmark: Option<u32>,
    no_lights: bool,
    config: Option<PathBuf>,
    save_config: bool,
    verbosity: i8,
}

const DEFAULT_FRAMES: u32 = 64;
const DEFAULT_BENCHMARK_PASSES: u32 = 100;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "help") {
        print_help();
        return;
    }
    if args.iter().any(|a| a == "-V" || a == "--version") {
        println!(
            "pathview {} (built {} {})",
            env!("CARGO_PKG_VERSION"),
            env!("PATHVIEW_BUILD_DATE"),
            env!("PATHVIEW_BUILD_TIME")
        );
        return;
    }

    let opts = match parse_args(&args) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("error: {e:#}");
            eprintln!("run `pathview --help` for usage");
            std::process::exit(2);
        }
    };

    #[allow(clippy::let_unit_value)]
    let _guard = init_tracing(opts.verbosity);

    if let Err(e) = run(&opts) {
        tracing::error!("{e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut opts = Options::default();
    let mut it = args.iter();

    fn value<'a>(it: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a str> {
        it.next()
            .map(String::as_str)
            .with_context(|| format!("{flag} needs a value"))
    }
    fn number<'a, T: std::str::FromStr>(it: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        let raw = value(it, flag)?;
        raw.parse::<T>()
            .map_err(|e| anyhow::anyhow!("{flag} {raw}: {e}"))
    }

    while let Some(arg) = it.next() {
        let flag = arg.as_str();
        match flag {
            "-p" => opts.path = Some(value(&mut it, flag)?.into()),
            "-f" => opts.file = Some(value(&mut it, flag)?.into()),
            "-o" => opts.output = Some(value(&mut it, flag)?.into()),
            "-n" => opts.frames = Some(number(&mut it, flag)?),
            "-nb" => opts.bounces = Some(number(&mut it, flag)?),
            "-ns" => opts.samples = Some(number(&mut it, flag)?),
            "-e" => opts.environment = Some(value(&mut it, flag)?.into()),
            "-bg" => opts.background = Some(value(&mut it, flag)?.into()),
            "-em" => opts.env_multiplier = Some(number(&mut it, flag)?),
            "-config" | "--device" => opts.device = Some(value(&mut it, flag)?.parse()?),
            "-nd" => opts.cpu_devices = Some(number(&mut it, flag)?),
            "-w" => opts.width = Some(number(&mut it, flag)?),
            "-h" => opts.height = Some(number(&mut it, flag)?),
            "-cpx" => opts.eye[0] = Some(number(&mut it, flag)?),
            "-cpy" => opts.eye[1] = Some(number(&mut it, flag)?),
            "-cpz" => opts.eye[2] = Some(number(&mut it, flag)?),
            "-tpx" => opts.target[0] = Some(number(&mut it, flag)?),
            "-tpy" => opts.target[1] = Some(number(&mut it, flag)?),
            "-tpz" => opts.target[2] = Some(number(&mut it, flag)?),
            "-a" => opts.aperture = Some(number(&mut it, flag)?),
            "-fd" => opts.focus_distance = Some(number(&mut it, flag)?),
            "-fl" => opts.focal_length = Some(number(&mut it, flag)?),
            "-cs" => opts.camera_speed = Some(number(&mut it, flag)?),
            "-cm" => opts.camera_path.extend(CameraMove::parse_path(value(&mut it, flag)?)?),
            "-b" | "--benchmark" => opts.benchmark = Some(DEFAULT_BENCHMARK_PASSES),
            "--no-lights" => opts.no_lights = true,
            "--settings" => opts.config = Some(value(&mut it, flag)?.into()),
            "--save-settings" => opts.save_config = true,
            "-v" | "--verbose" => opts.verbosity = opts.verbosity.max(1),
            "-vv" | "--trace" => opts.verbosity = 2,
            "-q" | "--quiet" => opts.verbosity = -1,
            other if opts.file.is_none() && !other.starts_with('-') => opts.file = Some(other.into()),
            other => bail!("unknown argument {other}"),
        }
    }
    Ok(opts)
}

fn env_filter(verbosity: i8) -> EnvFilter {
    let default = match verbosity {
        i8::MIN..=-1 => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the fmt subscriber, plus a Chrome trace writer when
/// `PATHVIEW_TRACE=1`. The returned guard flushes `trace.json` on drop.
#[cfg(feature = "chrome-trace")]
fn init_tracing(verbosity: i8) -> Option<tracing_chrome::FlushGuard> {
    let registry = tracing_subscriber::registry()
        .with(env_filter(verbosity))
        .with(tracing_subscriber::fmt::layer().with_target(false));

    if env::var("PATHVIEW_TRACE").ok().as_deref() != Some("1") {
        let _ = registry.try_init();
        return None;
    }
    let (chrome, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file("trace.json")
        .build();
    let _ = registry.with(chrome).try_init();
    Some(guard)
}

#[cfg(not(feature = "chrome-trace"))]
fn init_tracing(verbosity: i8) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(verbosity))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

/// Fold command-line overrides into the loaded settings.
fn apply_overrides(mut settings: Settings, opts: &Options) -> Settings {
    if let Some(w) = opts.width {
        settings.width = w;
    }
    if let Some(h) = opts.height {
        settings.height = h;
    }
    if let Some(mode) = opts.device {
        settings.device_mode = mode;
    }
    if let Some(n) = opts.cpu_devices {
        settings.cpu_devices = n;
    }
    if let Some(n) = opts.bounces {
        settings.num_bounces = n;
    }
    if let Some(n) = opts.samples {
        settings.sample_limit = Some(n);
    }
    if let Some(env) = &opts.environment {
        settings.environment = Some(env.clone());
    }
    if let Some(bg) = &opts.background {
        settings.background = Some(bg.clone());
    }
    if let Some(m) = opts.env_multiplier {
        settings.env_multiplier = m;
    }
    if let Some(a) = opts.aperture {
        settings.aperture = a;
    }
    if let Some(d) = opts.focus_distance {
        settings.focus_distance = d;
    }
    if let Some(speed) = opts.camera_speed {
        settings.camera_speed = speed;
    }
    if opts.no_lights {
        settings.default_lights = false;
    }
    settings.sanitize()
}

/// Mesh file and the directory its assets resolve against.
fn scene_paths(opts: &Options) -> Result<(PathBuf, PathBuf)> {
    let Some(file) = &opts.file else {
        bail!("no scene given (use -f <file.obj>)");
    };
    Ok(match &opts.path {
        Some(dir) => (dir.join(file), dir.clone()),
        None => {
            let base = file.parent().map(Path::to_path_buf).unwrap_or_default();
            (file.clone(), base)
        }
    })
}

fn setup_camera(scene: &mut Scene, settings: &Settings, opts: &Options) {
    let aspect = settings.width as f32 / settings.height as f32;
    let bounds = scene.world_bounds();
    let camera = scene.camera_mut();
    camera.frame(&bounds, aspect);

    if opts.eye.iter().chain(&opts.target).any(Option::is_some) {
        let eye = camera.position;
        let at = eye + camera.forward();
        let pick = |v: [Option<f32>; 3], d: Vec3| Vec3::new(v[0].unwrap_or(d.x), v[1].unwrap_or(d.y), v[2].unwrap_or(d.z));
        camera.look_at(pick(opts.eye, eye), pick(opts.target, at), Vec3::Y);
    }
    if let Some(fl) = opts.focal_length {
        camera.focal_length = fl;
    }
    for &step in &opts.camera_path {
        camera.apply_move(step, settings.camera_speed, bounds.center());
    }
    if !opts.camera_path.is_empty() {
        tracing::debug!(steps = opts.camera_path.len(), position = ?camera.position, "camera path applied");
    }
    camera.aperture = settings.aperture;
    camera.focus_distance = settings.focus_distance;
}

fn run(opts: &Options) -> Result<()> {
    let settings = Settings::load(opts.config.as_deref()).context("loading settings")?;
    let settings = apply_overrides(settings, opts);
    if opts.save_config {
        settings.save(opts.config.as_deref()).context("saving settings")?;
    }

    let (mesh_path, base_path) = scene_paths(opts)?;
    let loader = DiskImageLoader;

    let start = Instant::now();
    let mut scene = SceneBuilder::new(&ObjSource, &loader)
        .with_shading(settings.shading)
        .with_policy(settings.specular_policy)
        .build(&mesh_path, &base_path)?;
    tracing::info!("scene loaded in {:.2?}", start.elapsed());

    setup_camera(&mut scene, &settings, opts);
    if settings.default_lights {
        for light in Light::preview_rig() {
            scene.add_light(light);
        }
    }
    if let Some(env) = &settings.environment {
        scene
            .set_environment(&loader, env, settings.env_multiplier)
            .with_context(|| format!("environment {}", env.display()))?;
    }
    if let Some(bg) = &settings.background {
        scene
            .set_background(&loader, bg)
            .with_context(|| format!("background {}", bg.display()))?;
    }

    let devices = DeviceConfigSet::create(settings.device_mode, settings.cpu_devices)?;
    let mut orch = RenderOrchestrator::new(scene.into_shared(), devices, OrchestratorConfig::from(&settings))?;

    if let Some(passes) = opts.benchmark {
        let stats = orch.run_benchmark(passes)?;
        println!("{stats}");
    } else {
        orch.start()?;
        let frames = opts.frames.unwrap_or(DEFAULT_FRAMES);
        let start = Instant::now();
        let mut last = FrameStats::default();
        for _ in 0..frames {
            last = orch.update()?;
            tracing::debug!(
                frame = last.frame,
                samples = last.primary_samples,
                merged = last.merged,
                "frame {:.1?}",
                last.elapsed
            );
        }
        tracing::info!(
            frames,
            samples = last.primary_samples,
            merges = last.total_merges,
            "rendered in {:.2?}",
            start.elapsed()
        );
    }

    let output = opts.output.clone().unwrap_or_else(|| PathBuf::from("pathview.png"));
    orch.save_image(&output)
        .with_context(|| format!("writing {}", output.display()))?;
    orch.shutdown()?;
    println!("wrote {}", output.display());
    Ok(())
}

fn print_help() {
    println!("pathview - progressive path-tracing preview");
    println!();
    println!("USAGE:");
    println!("    pathview [OPTIONS] -f <scene.obj>");
    println!();
    println!("SCENE:");
    println!("    -p <dir>          Directory holding the scene and its assets");
    println!("    -f <file>         OBJ file (relative to -p if given)");
    println!("    -e <file>         Environment map (hdr/exr/png)");
    println!("    -bg <file>        Background map seen by camera rays");
    println!("    -em <float>       Environment multiplier");
    println!("    --no-lights       Skip the default light rig");
    println!();
    println!("RENDER:");
    println!("    -w <px>, -h <px>  Output size (default 1024x1024)");
    println!("    -n <frames>       Frames to render (default {DEFAULT_FRAMES})");
    println!("    -nb <n>           Bounces per path");
    println!("    -ns <n>           Primary sample limit");
    println!("    -config <mode>    Devices: cpu, gpu, mcpu, mgpu, all");
    println!("    -nd <n>           CPU devices for mcpu/all");
    println!("    -b, --benchmark   Time {DEFAULT_BENCHMARK_PASSES} primary passes");
    println!("    -o <file>         Output image (png/jpg/hdr/exr, default pathview.png)");
    println!();
    println!("CAMERA:");
    println!("    -cpx/-cpy/-cpz    Camera position");
    println!("    -tpx/-tpy/-tpz    Camera target");
    println!("    -a <m>            Aperture, -fd <m> focus distance, -fl <m> focal length");
    println!("    -cs <units/s>     Camera speed for scripted moves (default 100.25)");
    println!("    -cm <path>        Scripted camera moves applied after framing, e.g.");
    println!("                      forward:0.5,orbit:30:-10,rotate:15,up:0.2,roll:5");
    println!();
    println!("OPTIONS:");
    println!("    --settings <file> Settings file (default: user config dir)");
    println!("    --save-settings   Persist the effective settings");
    println!("    -v, -vv, -q       Verbose, trace, quiet (RUST_LOG overrides)");
    println!("    -V, --version     Show version and build date");
}
