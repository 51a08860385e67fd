use std::path::PathBuf;

use anyhow::{Result, anyhow};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use forge_bindings::manifest::{LoadedManifest, load_manifest};
use forge_bindings::{BindingError, GpuBackend, RecordingBackend, ShaderSpaceBuilder, WgpuBackend};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Emit,
    DryRun,
    Headless,
}

#[derive(Debug, Clone)]
struct Cli {
    manifest: Option<PathBuf>,
    mode: Mode,
    frames: u32,
    dump_wgsl: Option<PathBuf>,
    validate: bool,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            manifest: None,
            mode: Mode::Emit,
            frames: 1,
            dump_wgsl: None,
            validate: true,
        }
    }
}

const USAGE: &str = "supported: --manifest <bindings.json>, --emit, --dry-run, --headless, --frames <n>, --dump-wgsl <dir>, --no-validate";

fn value_of(args: &[String], i: usize) -> Result<&str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing value for {}", args[i]))
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--manifest" => {
                cli.manifest = Some(PathBuf::from(value_of(args, i)?));
                i += 2;
            }
            "--frames" => {
                let v = value_of(args, i)?;
                cli.frames = v.parse().map_err(|e| anyhow!("invalid --frames value {v}: {e}"))?;
                i += 2;
            }
            "--dump-wgsl" => {
                cli.dump_wgsl = Some(PathBuf::from(value_of(args, i)?));
                i += 2;
            }
            "--emit" => {
                cli.mode = Mode::Emit;
                i += 1;
            }
            "--dry-run" => {
                cli.mode = Mode::DryRun;
                i += 1;
            }
            "--headless" => {
                cli.mode = Mode::Headless;
                i += 1;
            }
            "--no-validate" => {
                cli.validate = false;
                i += 1;
            }
            other => return Err(anyhow!("unknown argument: {other} ({USAGE})")),
        }
    }
    Ok(cli)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn builder(manifest: &LoadedManifest, cli: &Cli) -> Result<ShaderSpaceBuilder> {
    let mut options = manifest.build_options();
    options.debug_dump_wgsl_dir = cli.dump_wgsl.clone();
    options.validate_wgsl = cli.validate;
    manifest.builder(options)
}

fn emit(manifest: &LoadedManifest, cli: &Cli) -> Result<()> {
    let bundles = builder(manifest, cli)?.emit()?;
    for bundle in &bundles {
        for (stage, text) in bundle.modules() {
            println!("// ── {}.{} ──", bundle.pass, stage);
            println!("{text}");
        }
    }
    Ok(())
}

/// Run `frames` frames. A frame waiting on an image is reported and skipped.
fn run_frames<B: GpuBackend>(
    space: &mut forge_bindings::ShaderSpace<B>,
    frames: u32,
    mut after_frame: impl FnMut(&mut forge_bindings::ShaderSpace<B>),
) -> Result<()> {
    for _ in 0..frames {
        match space.run_blocking() {
            Ok(stats) => println!(
                "[frame {}] commands={} events={}",
                stats.frame, stats.commands, stats.events_fired
            ),
            Err(BindingError::ResourceNotReady(reason)) => warn!("frame skipped: {reason}"),
            Err(e) => return Err(e.into()),
        }
        after_frame(space);
    }
    Ok(())
}

fn dry_run(manifest: &LoadedManifest, cli: &Cli) -> Result<()> {
    let mut space = builder(manifest, cli)?.build(RecordingBackend::with_history(1))?;
    run_frames(&mut space, cli.frames, |space| {
        for line in space.backend_mut().take_command_log() {
            println!("{line}");
        }
    })
}

fn headless(manifest: &LoadedManifest, cli: &Cli) -> Result<()> {
    let backend = match WgpuBackend::init() {
        Ok(backend) => backend,
        Err(BindingError::BackendUnavailable(reason)) => {
            eprintln!("[headless] no compatible GPU backend: {reason}");
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };
    let mut space = builder(manifest, cli)?.build(backend)?;
    run_frames(&mut space, cli.frames, |_| {})
}

fn main() -> Result<()> {
    init_tracing();
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;
    let path = cli
        .manifest
        .as_deref()
        .ok_or_else(|| anyhow!("--manifest is required ({USAGE})"))?;
    let manifest = load_manifest(path)?;

    match cli.mode {
        Mode::Emit => emit(&manifest, &cli),
        Mode::DryRun => dry_run(&manifest, &cli),
        Mode::Headless => headless(&manifest, &cli),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_modes_and_values() {
        let cli = parse_cli(&args(&["--manifest", "b.json", "--dry-run", "--frames", "3"])).unwrap();
        assert_eq!(cli.mode, Mode::DryRun);
        assert_eq!(cli.frames, 3);
        assert_eq!(cli.manifest, Some(PathBuf::from("b.json")));
        assert!(cli.validate);
    }

    #[test]
    fn rejects_unknown_and_incomplete_arguments() {
        assert!(parse_cli(&args(&["--frames"])).is_err());
        assert!(parse_cli(&args(&["--frames", "many"])).is_err());
        assert!(parse_cli(&args(&["--gpu"])).is_err());
    }
}
