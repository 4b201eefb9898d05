pub mod alerts;
pub mod engine;
pub mod metrics;
pub mod models;
pub mod ocr;
pub mod sensing;
pub mod settings;
pub mod similarity;
mod utils;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use alerts::SystemAlertSink;
use models::{Rect, Region};
use ocr::{OcrEngine, TesseractCli};
use sensing::{CaptureSource, Monitor, MonitorCommand, MonitorController};
use settings::{RegionConfig, SettingsStore, DEFAULT_CONFIG_FILE};
use similarity::{CompareMode, ScorerConfig, SimilarityScorer};

#[derive(Parser, Debug)]
#[command(
    name = "screen-alert",
    version,
    about = "Watch screen regions and alert with sound or speech when they change"
)]
struct Cli {
    /// Config file (created on first save)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Monitor all configured regions until Ctrl-C or `quit`
    Run(RunArgs),
    /// List configured regions
    Regions,
    /// Add a region by its screen rectangle
    #[command(name = "add-region")]
    AddRegion(AddRegionArgs),
    /// Remove region N (1-based, as listed by `regions`)
    #[command(name = "remove-region")]
    RemoveRegion { index: usize },
    /// Rename region N or change its sound/speech overrides
    #[command(name = "edit-region")]
    EditRegion(EditRegionArgs),
    /// Score two image files and print the comparison as JSON
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Use Tesseract OCR even if the config leaves it off
    #[arg(long, action = ArgAction::SetTrue)]
    ocr: bool,
}

#[derive(Args, Debug)]
struct AddRegionArgs {
    name: String,
    left: i64,
    top: i64,
    width: i64,
    height: i64,
}

#[derive(Args, Debug)]
struct EditRegionArgs {
    /// Region number (1-based)
    index: usize,
    #[arg(long)]
    name: Option<String>,
    /// Sound file for this region; an empty value reverts to the default
    #[arg(long)]
    sound: Option<String>,
    /// Speech message for this region; an empty value reverts to the default
    #[arg(long)]
    tts: Option<String>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    previous: PathBuf,
    current: PathBuf,
    /// combined, ssim, phash or text
    #[arg(long, default_value = "combined", value_parser = parse_compare_mode)]
    mode: CompareMode,
    /// Enable the OCR text method
    #[arg(long, action = ArgAction::SetTrue)]
    ocr: bool,
}

fn parse_compare_mode(raw: &str) -> Result<CompareMode, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_lowercase()))
        .map_err(|_| format!("unknown mode `{raw}` (expected combined, ssim, phash or text)"))
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
            runtime.block_on(run_monitor(&cli.config, args))
        }
        Commands::Regions => list_regions(&cli.config),
        Commands::AddRegion(args) => add_region(&cli.config, args),
        Commands::RemoveRegion { index } => remove_region(&cli.config, index),
        Commands::EditRegion(args) => edit_region(&cli.config, args),
        Commands::Compare(args) => compare_files(args),
    }
}

#[cfg(feature = "screen-capture")]
fn screen_source() -> Result<Box<dyn CaptureSource>> {
    Ok(Box::new(sensing::ScreenCapture::new()))
}

#[cfg(not(feature = "screen-capture"))]
fn screen_source() -> Result<Box<dyn CaptureSource>> {
    bail!("built without the `screen-capture` feature; nothing to monitor")
}

fn tesseract_if_available() -> Option<Arc<dyn OcrEngine>> {
    let engine = TesseractCli::default();
    if engine.is_available() {
        Some(Arc::new(engine))
    } else {
        warn!("tesseract not found; OCR text comparison disabled");
        None
    }
}

/// A line typed into the running monitor.
#[derive(Debug, PartialEq)]
enum Input {
    Command(MonitorCommand),
    Status,
    Metrics,
    Help,
    Quit,
}

const INPUT_HELP: &str = "commands: pause | pause-region N | mute-sound N | mute-tts N \
     | rename N NAME | set-sound N [PATH] | set-tts N [TEXT] | status | metrics | quit";

fn region_arg(words: &mut std::str::SplitWhitespace<'_>) -> Result<usize> {
    let raw = words.next().context("missing region number")?;
    let n: usize = raw
        .parse()
        .with_context(|| format!("`{raw}` is not a region number"))?;
    if n == 0 {
        bail!("regions are numbered from 1");
    }
    Ok(n - 1)
}

fn rest(words: std::str::SplitWhitespace<'_>) -> String {
    words.collect::<Vec<_>>().join(" ")
}

fn parse_input(line: &str) -> Result<Option<Input>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let input = match verb {
        "pause" => Input::Command(MonitorCommand::TogglePause),
        "pause-region" => {
            Input::Command(MonitorCommand::ToggleRegionPause(region_arg(&mut words)?))
        }
        "mute-sound" => Input::Command(MonitorCommand::ToggleMuteSound(region_arg(&mut words)?)),
        "mute-tts" => Input::Command(MonitorCommand::ToggleMuteTts(region_arg(&mut words)?)),
        "rename" => {
            let index = region_arg(&mut words)?;
            let name = rest(words);
            if name.is_empty() {
                bail!("missing new name");
            }
            Input::Command(edit_command(index, Some(name), None, None))
        }
        "set-sound" => {
            let index = region_arg(&mut words)?;
            Input::Command(edit_command(index, None, Some(rest(words)), None))
        }
        "set-tts" => {
            let index = region_arg(&mut words)?;
            Input::Command(edit_command(index, None, None, Some(rest(words))))
        }
        "status" => Input::Status,
        "metrics" => Input::Metrics,
        "help" | "?" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => bail!("unknown command `{other}`"),
    };
    Ok(Some(input))
}

fn edit_command(
    index: usize,
    name: Option<String>,
    sound_file: Option<String>,
    tts_message: Option<String>,
) -> MonitorCommand {
    MonitorCommand::EditRegion {
        index,
        name,
        sound_file,
        tts_message,
    }
}

async fn run_monitor(config_path: &Path, args: RunArgs) -> Result<()> {
    let store = Arc::new(SettingsStore::open(config_path.to_path_buf()));
    let mut config = store.config();
    config.settings.ocr_enabled |= args.ocr;

    let ocr = if config.settings.ocr_enabled {
        tesseract_if_available()
    } else {
        None
    };
    if config.regions.is_empty() {
        warn!("no regions configured in {}; use `add-region` first", config_path.display());
    }

    let sink = Arc::new(SystemAlertSink::new());
    let monitor = Monitor::new(config, screen_source()?, sink.clone(), ocr);

    let mut controller = MonitorController::new();
    controller.start(monitor, store)?;
    info!("screen-alert running; {INPUT_HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line.context("failed to read stdin")? else {
                    // headless: keep monitoring until Ctrl-C
                    stdin_open = false;
                    continue;
                };
                match parse_input(&line) {
                    Ok(None) => {}
                    Ok(Some(Input::Command(command))) => match controller.send(command).await {
                        Ok(outcome) => println!("{outcome}"),
                        Err(err) => println!("error: {err:#}"),
                    },
                    Ok(Some(Input::Status)) => {
                        let text = controller.subscribe().borrow().to_string();
                        print!("{text}");
                    }
                    Ok(Some(Input::Metrics)) => {
                        let snapshot = controller.metrics().get_snapshot().await;
                        println!("{}", serde_json::to_string_pretty(&snapshot)?);
                    }
                    Ok(Some(Input::Help)) => println!("{INPUT_HELP}"),
                    Ok(Some(Input::Quit)) => break,
                    Err(err) => println!("error: {err:#}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    controller.stop().await?;
    sink.shutdown();
    Ok(())
}

fn list_regions(config_path: &Path) -> Result<()> {
    let config = SettingsStore::open(config_path.to_path_buf()).config();
    if config.regions.is_empty() {
        println!("no regions configured");
        return Ok(());
    }
    for (index, entry) in config.regions.into_iter().enumerate() {
        let rect = entry.rect;
        let region = entry.into_region();
        let mut flags = Vec::new();
        if region.paused {
            flags.push("paused");
        }
        if region.mute_sound.deadline().is_some() {
            flags.push("sound muted");
        }
        if region.mute_tts.deadline().is_some() {
            flags.push("tts muted");
        }
        println!(
            "{:>2}. {} {rect} {}",
            index + 1,
            region.display_name(index),
            flags.join(", ")
        );
    }
    Ok(())
}

fn add_region(config_path: &Path, args: AddRegionArgs) -> Result<()> {
    let rect = Rect::try_from([args.left, args.top, args.width, args.height])?;
    let store = SettingsStore::open(config_path.to_path_buf());
    let mut config = store.config();
    let region = Region::new(args.name, rect);
    config.regions.push(RegionConfig::from_region(&region));
    let index = config.regions.len() - 1;
    store.save(config)?;
    println!("added region #{} {}", index + 1, region.display_name(index));
    Ok(())
}

fn remove_region(config_path: &Path, index: usize) -> Result<()> {
    let store = SettingsStore::open(config_path.to_path_buf());
    let mut config = store.config();
    if index == 0 || index > config.regions.len() {
        bail!("no region #{index} (have {})", config.regions.len());
    }
    let removed = config.regions.remove(index - 1);
    store.save(config)?;
    println!("removed {}", removed.into_region().display_name(index - 1));
    Ok(())
}

fn edit_region(config_path: &Path, args: EditRegionArgs) -> Result<()> {
    if args.name.is_none() && args.sound.is_none() && args.tts.is_none() {
        bail!("nothing to change (use --name, --sound or --tts)");
    }
    let store = SettingsStore::open(config_path.to_path_buf());
    let mut config = store.config();
    let count = config.regions.len();
    if args.index == 0 || args.index > count {
        bail!("no region #{} (have {count})", args.index);
    }
    let index = args.index - 1;

    let mut region = config.regions[index].clone().into_region();
    region.edit(args.name, args.sound, args.tts);
    config.regions[index] = RegionConfig::from_region(&region);
    store.save(config)?;
    println!("updated region #{} {}", args.index, region.display_name(index));
    Ok(())
}

fn compare_files(args: CompareArgs) -> Result<()> {
    let previous = image::open(&args.previous)
        .with_context(|| format!("failed to open {}", args.previous.display()))?;
    let current = image::open(&args.current)
        .with_context(|| format!("failed to open {}", args.current.display()))?;

    let mut scorer = SimilarityScorer::new(ScorerConfig {
        mode: args.mode,
        ..ScorerConfig::default()
    });
    if args.ocr || args.mode == CompareMode::Text {
        if let Some(engine) = tesseract_if_available() {
            scorer = scorer.with_ocr(engine);
        }
    }

    let result = scorer.compare(&previous, &current);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_interactive_commands() {
        assert_eq!(parse_input("  ").unwrap(), None);
        assert_eq!(
            parse_input("pause").unwrap(),
            Some(Input::Command(MonitorCommand::TogglePause))
        );
        assert_eq!(
            parse_input("mute-tts 2").unwrap(),
            Some(Input::Command(MonitorCommand::ToggleMuteTts(1)))
        );
        assert_eq!(parse_input("quit").unwrap(), Some(Input::Quit));
        assert!(parse_input("pause-region 0").is_err());
        assert!(parse_input("pause-region x").is_err());
        assert!(parse_input("mute-sound").is_err());
        assert!(parse_input("dance").is_err());

        assert_eq!(
            parse_input("rename 1 Boss  health").unwrap(),
            Some(Input::Command(MonitorCommand::EditRegion {
                index: 0,
                name: Some("Boss health".into()),
                sound_file: None,
                tts_message: None,
            }))
        );
        assert_eq!(
            parse_input("set-sound 2").unwrap(),
            Some(Input::Command(MonitorCommand::EditRegion {
                index: 1,
                name: None,
                sound_file: Some(String::new()),
                tts_message: None,
            }))
        );
        assert!(parse_input("rename 1").is_err());
    }

    #[test]
    fn compare_mode_flag_parses_case_insensitively() {
        assert_eq!(parse_compare_mode("SSIM").unwrap(), CompareMode::Ssim);
        assert_eq!(parse_compare_mode("text").unwrap(), CompareMode::Text);
        assert!(parse_compare_mode("fuzzy").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn add_and_remove_region_edit_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        add_region(
            &path,
            AddRegionArgs {
                name: "chat".into(),
                left: 10,
                top: 10,
                width: 200,
                height: 80,
            },
        )
        .unwrap();
        assert!(add_region(
            &path,
            AddRegionArgs {
                name: "bad".into(),
                left: 0,
                top: 0,
                width: 0,
                height: 5,
            },
        )
        .is_err());

        let config = SettingsStore::open(path.clone()).config();
        assert_eq!(config.regions.len(), 1);
        assert_eq!(config.regions[0].name, "chat");

        edit_region(
            &path,
            EditRegionArgs {
                index: 1,
                name: Some("party chat".into()),
                sound: Some("/sounds/ping.wav".into()),
                tts: None,
            },
        )
        .unwrap();
        let edited = &SettingsStore::open(path.clone()).config().regions[0];
        assert_eq!(edited.name, "party chat");
        assert_eq!(edited.sound_file.as_deref(), Some("/sounds/ping.wav"));
        assert_eq!(edited.rect, Rect::new(10, 10, 200, 80).unwrap());
        assert!(edit_region(
            &path,
            EditRegionArgs {
                index: 1,
                name: None,
                sound: None,
                tts: None,
            },
        )
        .is_err());

        assert!(remove_region(&path, 2).is_err());
        remove_region(&path, 1).unwrap();
        assert!(SettingsStore::open(path).config().regions.is_empty());
    }
}
