use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use serde_json::{json, Map, Value};
use tryon_contracts::events::EventLog;
use tryon_contracts::receipts::write_receipt;
use tryon_contracts::session::{parse_command, SessionCommand, SESSION_HELP_COMMANDS};
use tryon_contracts::{
    CreativityLevel, ImageRole, OutfitDraft, OutfitMode, OutfitSpec, SubjectImage, TryOnInputs,
};
use tryon_engine::normalize::decode_dimensions;
use tryon_engine::{
    default_capability_registry, normalize, GeminiConfig, GenerationCapability, RequestComposer,
    Session, TryOnEngine,
};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "tryon-rs", version, about = "Virtual try-on request engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Prompt(PromptArgs),
    Normalize(NormalizeArgs),
    Studio(StudioArgs),
}

#[derive(Debug, Parser)]
struct CapabilityArgs {
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value_t = 25)]
    creativity: i64,
    /// Send outfit photos without letterboxing them to the subject size.
    #[arg(long)]
    no_normalize: bool,
}

#[derive(Debug, Parser)]
#[command(group(ArgGroup::new("outfit").required(true).args(["outfit_text", "outfit_image"])))]
struct GenerateArgs {
    #[arg(long)]
    subject: PathBuf,
    #[arg(long)]
    outfit_text: Option<String>,
    #[arg(long)]
    outfit_image: Option<PathBuf>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    capability: CapabilityArgs,
}

#[derive(Debug, Parser)]
#[command(group(ArgGroup::new("outfit").required(true).args(["outfit_text", "outfit_image"])))]
struct PromptArgs {
    #[arg(long)]
    subject: PathBuf,
    #[arg(long)]
    outfit_text: Option<String>,
    #[arg(long)]
    outfit_image: Option<PathBuf>,
    #[arg(long, default_value_t = 25)]
    creativity: i64,
}

#[derive(Debug, Parser)]
struct NormalizeArgs {
    #[arg(long)]
    target: PathBuf,
    #[arg(long)]
    candidate: PathBuf,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct StudioArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    capability: CapabilityArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("tryon-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Prompt(args) => run_prompt(args),
        Command::Normalize(args) => run_normalize(args),
        Command::Studio(args) => {
            run_studio(args)?;
            Ok(0)
        }
    }
}

fn select_capability(args: &CapabilityArgs) -> Result<Arc<dyn GenerationCapability>> {
    let provider = args.provider.trim().to_ascii_lowercase();
    let gemini = if provider == "gemini" {
        Some(GeminiConfig::from_env()?.with_model(args.model.as_deref()))
    } else {
        None
    };
    let registry = default_capability_registry(gemini);
    match registry.get(&provider) {
        Some(capability) => Ok(capability),
        None => bail!(
            "unknown provider '{}' (available: {})",
            args.provider,
            registry.names().join(", ")
        ),
    }
}

fn open_session(
    command: &str,
    out_dir: &Path,
    events: Option<&Path>,
    args: &CapabilityArgs,
) -> Result<Session> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let capability = select_capability(args)?;
    let events_path = events
        .map(Path::to_path_buf)
        .unwrap_or_else(|| out_dir.join("events.jsonl"));
    let log = EventLog::new(events_path, Uuid::new_v4().to_string());
    log.emit(
        "session_started",
        json_object(json!({
            "command": command,
            "capability": capability.name(),
            "model": capability.model(),
            "out_dir": out_dir.to_string_lossy().to_string(),
            "normalize_outfit": !args.no_normalize,
        })),
    )?;

    let engine = TryOnEngine::new(capability)
        .with_events(log)
        .with_outfit_normalization(!args.no_normalize);
    let mut session = Session::new(engine);
    session.set_creativity(CreativityLevel::new(args.creativity)?);
    Ok(session)
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut session = open_session(
        "generate",
        &args.out,
        args.events.as_deref(),
        &args.capability,
    )?;
    session.set_subject(SubjectImage::from_path(ImageRole::Subject, &args.subject)?);
    if let Some(path) = args.outfit_image.as_deref() {
        session.set_outfit_image(SubjectImage::from_path(ImageRole::Outfit, path)?);
    } else if let Some(text) = args.outfit_text.as_deref() {
        session.set_description(text);
    }

    match generate_and_store(&mut session, &args.out)? {
        Some(path) => {
            println!("{}", path.display());
            Ok(0)
        }
        None => Ok(1),
    }
}

/// Runs one attempt and writes the image plus its receipt into `out_dir`.
fn generate_and_store(session: &mut Session, out_dir: &Path) -> Result<Option<PathBuf>> {
    println!(
        "Generating with {} ({} mode, creativity {})...",
        session.engine().capability_name(),
        session.draft().mode().as_str(),
        session.draft().creativity().value()
    );
    if let Err(err) = session.generate() {
        eprintln!("tryon-rs error: {err}");
        return Ok(None);
    }
    let Some(report) = session.last_report() else {
        return Ok(None);
    };
    let stem = out_dir.join(format!("tryon-{}", report.attempt_id));
    let image_path = session.save_result(&stem)?;
    if let Some(receipt) = report.receipt(&image_path) {
        write_receipt(&receipt_path_for(&image_path), &receipt)?;
    }
    println!(
        "Saved {} ({} tier, {} ms)",
        image_path.display(),
        report
            .request
            .as_ref()
            .map(|request| request.tier().name())
            .unwrap_or("unknown"),
        report.elapsed.as_millis()
    );
    Ok(Some(image_path))
}

fn receipt_path_for(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("tryon");
    image_path.with_file_name(format!("{stem}.receipt.json"))
}

fn run_prompt(args: PromptArgs) -> Result<i32> {
    let subject = SubjectImage::from_path(ImageRole::Subject, &args.subject)?;
    let outfit = match (args.outfit_text.as_deref(), args.outfit_image.as_deref()) {
        (_, Some(path)) => {
            OutfitSpec::ReferenceImage(SubjectImage::from_path(ImageRole::Outfit, path)?)
        }
        (Some(text), None) => OutfitSpec::text(text)?,
        (None, None) => bail!("either --outfit-text or --outfit-image is required"),
    };
    let inputs = TryOnInputs::new(subject, outfit, CreativityLevel::new(args.creativity)?);
    let request = RequestComposer::new().compose(&inputs);
    println!("tier: {}", request.tier().name());
    println!("parts: {}", request.parts().len());
    println!("fingerprint: {}", request.fingerprint());
    println!();
    println!("{}", request.instruction());
    Ok(0)
}

fn run_normalize(args: NormalizeArgs) -> Result<i32> {
    let target = fs::read(&args.target)
        .with_context(|| format!("failed reading {}", args.target.display()))?;
    let candidate = fs::read(&args.candidate)
        .with_context(|| format!("failed reading {}", args.candidate.display()))?;
    let (width, height) = decode_dimensions(&target, ImageRole::Subject)?;
    let normalized = normalize(width, height, &candidate)?;

    let out = if args.out.extension().is_some() {
        args.out.clone()
    } else {
        args.out.with_extension("png")
    };
    if let Some(parent) = out.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&out, normalized.image.bytes())
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!(
        "{} ({}x{}, drawn {}x{} at {},{})",
        out.display(),
        normalized.width,
        normalized.height,
        normalized.letterbox.drawn_width,
        normalized.letterbox.drawn_height,
        normalized.letterbox.offset_x,
        normalized.letterbox.offset_y
    );
    Ok(0)
}

fn run_studio(args: StudioArgs) -> Result<()> {
    let mut session = open_session(
        "studio",
        &args.out,
        args.events.as_deref(),
        &args.capability,
    )?;
    let stdin = io::stdin();
    let mut line = String::new();

    println!("Try-on studio started. Type /help for commands.");
    if let Some(log) = session.engine().events() {
        println!("Events: {} (session {})", log.path().display(), log.session_id());
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        match parse_command(input) {
            SessionCommand::Noop => {}
            SessionCommand::Help => {
                println!("Commands: {}", SESSION_HELP_COMMANDS.join(" "));
                println!("Any other text describes the outfit and generates.");
            }
            SessionCommand::SetPhoto(path) => {
                match SubjectImage::from_path(ImageRole::Subject, Path::new(&path)) {
                    Ok(image) => {
                        session.set_subject(image);
                        println!("Photo set to {path}");
                    }
                    Err(err) => println!("Photo not loaded: {err:#}"),
                }
            }
            SessionCommand::SetOutfitImage(path) => {
                match SubjectImage::from_path(ImageRole::Outfit, Path::new(&path)) {
                    Ok(image) => {
                        session.set_outfit_image(image);
                        println!("Outfit image set to {path}");
                    }
                    Err(err) => println!("Outfit not loaded: {err:#}"),
                }
            }
            SessionCommand::Describe(text) => {
                session.set_description(text);
                println!("Outfit description updated");
            }
            SessionCommand::SetMode(raw) => match OutfitMode::parse(&raw) {
                Some(mode) => {
                    session.set_mode(mode);
                    println!("Outfit mode: {}", mode.as_str());
                }
                None => println!("/mode requires text or image"),
            },
            SessionCommand::SetCreativity(value) => match CreativityLevel::new(value) {
                Ok(level) => {
                    session.set_creativity(level);
                    println!("Creativity: {}", level.value());
                }
                Err(err) => println!("{err}"),
            },
            SessionCommand::Generate => studio_generate(&mut session, &args.out),
            SessionCommand::DescribeAndGenerate(text) => {
                session.set_description(text);
                studio_generate(&mut session, &args.out);
            }
            SessionCommand::Continue => match session.continue_styling() {
                Ok(()) => println!("Result is now the photo. Describe the next outfit."),
                Err(err) => println!("{err}"),
            },
            SessionCommand::Save(path) => match session.save_result(Path::new(&path)) {
                Ok(saved) => println!("Saved {}", saved.display()),
                Err(err) => println!("Save failed: {err:#}"),
            },
            SessionCommand::Status => println!("{}", status_line(&session)),
            SessionCommand::Invalid { command, reason } => println!("/{command} {reason}"),
            SessionCommand::Unknown { command, .. } => {
                println!("Unknown command /{command}. Type /help for commands.")
            }
        }
    }

    Ok(())
}

/// Storage failures are reported and the loop keeps going.
fn studio_generate(session: &mut Session, out_dir: &Path) {
    if let Err(err) = generate_and_store(session, out_dir) {
        eprintln!("tryon-rs error: {err:#}");
    }
}

fn status_line(session: &Session) -> String {
    let draft = session.draft();
    let outfit = match draft.outfit() {
        OutfitDraft::Text(text) if text.trim().is_empty() => "text (empty)".to_string(),
        OutfitDraft::Text(text) => format!("text \"{}\"", text.trim()),
        OutfitDraft::Image(Some(image)) => format!("image ({})", image.mime_type()),
        OutfitDraft::Image(None) => "image (missing)".to_string(),
    };
    let photo = match draft.subject() {
        Some(image) => image.mime_type(),
        None => "missing",
    };
    format!(
        "photo: {photo} | outfit: {outfit} | creativity: {} | ready: {} | result: {}",
        draft.creativity().value(),
        if draft.can_generate() { "yes" } else { "no" },
        if session.last_result().is_some() { "yes" } else { "no" }
    )
}

fn json_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
