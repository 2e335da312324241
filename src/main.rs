use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use daynote::EngineError;
use daynote::format::{format_document, render_task};
use daynote::lookup;
use daynote::ops;
use daynote::parser::parse_document;
use daynote::position::{self, InsertPosition};

#[derive(Debug, Parser)]
#[command(
    name = "daynote",
    about = "Daily-note task tooling built on the daynote crate",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse a note and print its structure.
    Parse(ParseArgs),

    /// Regenerate a note from its parsed structure.
    Format(FormatArgs),

    /// Mark a task as completed and reposition it with the processed run.
    Done(DoneArgs),

    /// Mark a task as abandoned in place.
    Abandon(AbandonArgs),

    /// Add a new pending task.
    Add(AddArgs),

    /// Replace a task with a removal marker.
    Remove(RemoveArgs),

    /// Mark a task as moved and optionally deliver it to another note.
    Move(MoveArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Note files to parse.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of a debug representation.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct FormatArgs {
    /// Note files to format.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Rewrite the files instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct DoneArgs {
    /// Note file containing the task.
    file: PathBuf,
    /// Text resolving to exactly one task.
    query: String,
    /// Completion time as HH:MM; defaults to now.
    #[arg(long)]
    time: Option<String>,
    /// Comment line to attach to the completed task.
    #[arg(long)]
    note: Option<String>,
}

#[derive(Debug, Args)]
struct AbandonArgs {
    /// Note file containing the task.
    file: PathBuf,
    /// Text resolving to exactly one task.
    query: String,
}

#[derive(Debug, Args)]
struct AddArgs {
    /// Note file to add the task to.
    file: PathBuf,
    /// Task text; leading emoji and scheduled times are recognized.
    text: String,
    /// Where to insert the new task.
    #[arg(long, value_enum, default_value = "beginning")]
    position: PositionArg,
    /// Anchor query for --position after.
    #[arg(long)]
    after: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PositionArg {
    /// The current spot, right after the processed run.
    Beginning,
    /// The end of the note.
    End,
    /// Directly after the task named by --after.
    After,
}

#[derive(Debug, Args)]
struct RemoveArgs {
    /// Note file containing the task.
    file: PathBuf,
    /// Text resolving to exactly one task.
    query: String,
}

#[derive(Debug, Args)]
struct MoveArgs {
    /// Note file containing the task.
    file: PathBuf,
    /// Text resolving to exactly one task.
    query: String,
    /// Destination name recorded on the moved task.
    #[arg(long)]
    target: String,
    /// Destination note to receive the task; when omitted, the entry is
    /// printed for manual placement.
    #[arg(long)]
    dest_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = init_logging(cli.verbose)?;

    match &cli.command {
        Commands::Parse(args) => handle_parse(args),
        Commands::Format(args) => handle_format(args),
        Commands::Done(args) => handle_done(args),
        Commands::Abandon(args) => handle_abandon(args),
        Commands::Add(args) => handle_add(args),
        Commands::Remove(args) => handle_remove(args),
        Commands::Move(args) => handle_move(args),
    }
}

fn init_logging(verbose: bool) -> Result<flexi_logger::LoggerHandle> {
    let spec = if verbose { "debug" } else { "warn" };
    flexi_logger::Logger::try_with_str(spec)
        .context("building log specification")?
        .log_to_stderr()
        .start()
        .context("starting logger")
}

/* ------------------------------ File plumbing ------------------------------ */

fn read_note(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(EngineError::FileMissing {
            path: path.display().to_string(),
        }
        .into()),
        Err(err) => Err(err).with_context(|| format!("reading {path:?}")),
    }
}

fn write_note(path: &Path, text: &str) -> Result<()> {
    let mut out = text.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    fs::write(path, out).with_context(|| format!("writing {path:?}"))
}

/* -------------------------------- Handlers -------------------------------- */

fn handle_parse(args: &ParseArgs) -> Result<()> {
    for input in &args.inputs {
        let text = read_note(input)?;
        let doc = parse_document(&input.display().to_string(), &text);
        if args.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&doc)
                    .with_context(|| format!("serializing {input:?}"))?
            );
        } else {
            println!("{doc:#?}");
        }
    }
    Ok(())
}

fn handle_format(args: &FormatArgs) -> Result<()> {
    for input in &args.inputs {
        let text = read_note(input)?;
        let doc = parse_document(&input.display().to_string(), &text);
        let formatted = format_document(&doc);
        if args.in_place {
            write_note(input, &formatted)?;
        } else {
            println!("{formatted}");
        }
    }
    Ok(())
}

fn handle_done(args: &DoneArgs) -> Result<()> {
    let text = read_note(&args.file)?;
    let doc = parse_document(&args.file.display().to_string(), &text);
    let time = args
        .time
        .clone()
        .unwrap_or_else(|| Local::now().format("%H:%M").to_string());
    let done = ops::complete_task(&doc, &args.query, Some(&time), args.note.as_deref())?;
    // Reposition the checked-off task with the rest of the processed run.
    let task = lookup::find_task_by_description(&done, &args.query)?.clone();
    let repositioned = position::move_task_to_current_spot(&done, &task)?;
    write_note(&args.file, &format_document(&repositioned))?;
    println!("completed {:?}", task.description);
    Ok(())
}

fn handle_abandon(args: &AbandonArgs) -> Result<()> {
    let text = read_note(&args.file)?;
    let doc = parse_document(&args.file.display().to_string(), &text);
    let updated = ops::abandon_task(&doc, &args.query)?;
    write_note(&args.file, &format_document(&updated))?;
    println!("abandoned {:?}", args.query);
    Ok(())
}

fn handle_add(args: &AddArgs) -> Result<()> {
    let text = read_note(&args.file)?;
    let doc = parse_document(&args.file.display().to_string(), &text);
    let position = match (args.position, &args.after) {
        (PositionArg::Beginning, _) => InsertPosition::Beginning,
        (PositionArg::End, _) => InsertPosition::End,
        (PositionArg::After, Some(anchor)) => InsertPosition::After(anchor.clone()),
        (PositionArg::After, None) => bail!("--position after requires --after"),
    };
    let updated = ops::add_task(&doc, &args.text, &position)?;
    write_note(&args.file, &format_document(&updated))?;
    Ok(())
}

fn handle_remove(args: &RemoveArgs) -> Result<()> {
    let text = read_note(&args.file)?;
    let doc = parse_document(&args.file.display().to_string(), &text);
    let updated = ops::remove_task(&doc, &args.query)?;
    write_note(&args.file, &format_document(&updated))?;
    println!("removed {:?}", args.query);
    Ok(())
}

fn handle_move(args: &MoveArgs) -> Result<()> {
    let text = read_note(&args.file)?;
    let doc = parse_document(&args.file.display().to_string(), &text);
    let (updated, entry) = ops::relocate_task(&doc, &args.query, &args.target)?;
    write_note(&args.file, &format_document(&updated))?;

    match &args.dest_file {
        Some(dest) => {
            let dest_text = read_note(dest)?;
            let dest_doc = parse_document(&dest.display().to_string(), &dest_text);
            let spot = position::find_current_spot(&dest_doc);
            let delivered = position::insert_task_at_position(&dest_doc, entry, spot)?;
            write_note(dest, &format_document(&delivered))?;
        }
        None => println!("{}", render_task(&entry)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_note_surfaces_missing_files() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.md");
        let err = read_note(&missing).unwrap_err();
        match err.downcast_ref::<EngineError>() {
            Some(EngineError::FileMissing { path }) => {
                assert!(path.ends_with("absent.md"));
            }
            other => panic!("expected FileMissing, got {other:?}"),
        }
    }

    #[test]
    fn done_rewrites_the_file_and_repositions() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("today.md");
        fs::write(&file, "- [ ] Call dentist\n- [x] Send invoice (14:05)\n").unwrap();

        let args = DoneArgs {
            file: file.clone(),
            query: "Call dentist".into(),
            time: Some("15:00".into()),
            note: None,
        };
        handle_done(&args).unwrap();

        let out = fs::read_to_string(&file).unwrap();
        assert_eq!(
            out,
            "- [x] Send invoice (14:05)\n- [x] Call dentist (15:00)\n"
        );
    }

    #[test]
    fn add_inserts_at_the_current_spot_by_default() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("today.md");
        fs::write(&file, "- [x] done\n- [ ] next\n").unwrap();

        let args = AddArgs {
            file: file.clone(),
            text: "Buy milk".into(),
            position: PositionArg::Beginning,
            after: None,
        };
        handle_add(&args).unwrap();

        let out = fs::read_to_string(&file).unwrap();
        assert_eq!(out, "- [x] done\n- [ ] Buy milk\n- [ ] next\n");
    }

    #[test]
    fn move_delivers_the_entry_to_the_destination() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("today.md");
        let dest = dir.path().join("tomorrow.md");
        fs::write(&source, "- [ ] Buy milk\n").unwrap();
        fs::write(&dest, "- [x] done\n").unwrap();

        let args = MoveArgs {
            file: source.clone(),
            query: "Buy milk".into(),
            target: "tomorrow".into(),
            dest_file: Some(dest.clone()),
        };
        handle_move(&args).unwrap();

        let source_out = fs::read_to_string(&source).unwrap();
        assert_eq!(source_out, "- [>] Buy milk → tomorrow\n");

        let dest_out = fs::read_to_string(&dest).unwrap();
        let lines: Vec<&str> = dest_out.lines().collect();
        assert_eq!(lines[0], "- [x] done");
        assert!(lines[1].starts_with("- [ ] Buy milk (from "));
        assert!(lines[1].ends_with("today.md)"));
    }
}
