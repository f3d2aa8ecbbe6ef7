use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use env_logger::Env;

use datefix::metadata::{self, native::NativeReader, MetadataTool};
use datefix::organize::{self, OrganizeOptions};
use datefix::prompt::TerminalPrompter;
use datefix::reconcile::{ResolveOptions, TieBreak};
use datefix::search::SearchOptions;
use datefix::transcode::TranscodeOptions;
use datefix::{RunSummary, SetDatesOptions};

#[derive(Parser)]
#[command(name = "datefix", version, about = "Reconcile and rewrite media timestamps from EXIF, file times, backups and filenames")]
struct Cli {
    /// exiftool binary to use
    #[arg(long, global = true, env = "DATEFIX_EXIFTOOL")]
    exiftool: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Set destination tags from source tags, backups and the filename
    SetDates {
        /// Glob pattern selecting files, e.g. './**/*.JPG'
        pattern: String,

        /// Comma-separated source tags, e.g. 'Composite:SubSecDateTimeOriginal,File:System:FileModifyDate'
        #[arg(long)]
        src_tags: Option<String>,

        /// Comma-separated destination tags, e.g. 'File:System:FileModifyDate,AllDates'
        #[arg(long)]
        dest_tags: String,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Set filesystem times from embedded dates or the filename
    SetSystem {
        pattern: String,

        #[arg(long, default_value = "File:System:FileModifyDate")]
        dest_tags: String,

        /// Only use the filename (and backups); never read embedded metadata
        #[arg(long)]
        no_exiftool: bool,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Write embedded date tags from a filesystem time
    SetExif {
        pattern: String,

        /// Destination tag(s)
        #[arg(long, default_value = "AllDates")]
        tag: String,

        #[arg(long, default_value = "File:System:FileModifyDate")]
        src_tags: String,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// List files whose tags satisfy a comparison, optionally moving them
    Search {
        pattern: String,

        /// e.g. 'DateTimeOriginal > CreateDate | File:System:FileCreateDate <> EXIF:DateTimeOriginal'
        #[arg(long)]
        compare: Option<String>,

        /// Move matching files into this folder
        #[arg(long)]
        move_to: Option<PathBuf>,

        #[arg(long)]
        dry_run: bool,
    },
    /// Move files into per-year folders by creation (or modify) time
    Organize {
        pattern: String,

        /// Folder receiving the YYYY subfolders
        #[arg(long)]
        dest: PathBuf,

        #[arg(long)]
        dry_run: bool,
    },
    /// Re-encode videos with x265, keeping metadata and file times
    Transcode {
        pattern: String,

        /// x265 constant rate factor (lower is higher quality)
        #[arg(long, default_value_t = 28)]
        crf: u8,

        /// Scale down to at most this width
        #[arg(long)]
        max_width: Option<u32>,

        /// Output extension
        #[arg(long, default_value = ".mp4")]
        suffix: String,

        /// Move each original here after a successful transcode
        #[arg(long)]
        move_original_to: Option<PathBuf>,

        /// Print the ffmpeg command without running it
        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        progress: bool,

        #[arg(long, default_value = "ffmpeg")]
        ffmpeg: PathBuf,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Folder searched (recursively) for files with the same name
    #[arg(long)]
    backups_path: Option<PathBuf>,

    /// Tags read from backup matches (default: every date tag)
    #[arg(long)]
    backups_tags: Option<String>,

    /// Ask which value to use when candidates disagree
    #[arg(short, long)]
    interactive: bool,

    /// Show the full metadata dump when asking
    #[arg(long)]
    show_exiftool: bool,

    /// Report intended changes without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Let metadata writes change the file's system times
    #[arg(long)]
    update_systime: bool,

    #[arg(long)]
    progress: bool,

    /// Value picked when candidates disagree and no one is asked
    #[arg(long, value_enum)]
    tie_break: Option<TieBreak>,

    /// Disable date guessing from filenames
    #[arg(long)]
    no_guess: bool,

    /// Extra filename pattern '<regex>=<chrono format>' with a 'date' group
    #[arg(long = "name-pattern", value_name = "REGEX=FORMAT")]
    name_patterns: Vec<String>,

    /// Write a JSON report of every file to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

impl CommonArgs {
    fn into_options(
        self,
        pattern: String,
        src_tags: Option<String>,
        dest_tags: String,
        tie_break: TieBreak,
    ) -> SetDatesOptions {
        SetDatesOptions {
            pattern,
            src_tags,
            dest_tags,
            backups_path: self.backups_path,
            backups_tags: self.backups_tags,
            resolve: ResolveOptions {
                interactive: self.interactive,
                show_raw_dump: self.show_exiftool,
                tie_break: self.tie_break.unwrap_or(tie_break),
            },
            dry_run: self.dry_run,
            update_system_time: self.update_systime,
            progress: self.progress,
            guess_from_filename: !self.no_guess,
            name_patterns: self.name_patterns,
            report: self.report,
        }
    }
}

fn set_dates(options: SetDatesOptions, tool: &dyn MetadataTool) -> anyhow::Result<RunSummary> {
    let mut prompter = TerminalPrompter::stdio();
    datefix::set_dates(&options, tool, &mut prompter)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
    let exiftool = cli.exiftool;

    let summary = match cli.command {
        Command::SetDates {
            pattern,
            src_tags,
            dest_tags,
            common,
        } => {
            let options = common.into_options(pattern, src_tags, dest_tags, TieBreak::First);
            set_dates(options, &*metadata::detect(exiftool))?
        }
        Command::SetSystem {
            pattern,
            dest_tags,
            no_exiftool,
            common,
        } => {
            let (src_tags, tool): (_, Box<dyn MetadataTool>) = if no_exiftool {
                (None, Box::new(NativeReader))
            } else {
                (Some("EXIF:*".to_string()), metadata::detect(exiftool))
            };
            let options = common.into_options(pattern, src_tags, dest_tags, TieBreak::Earliest);
            set_dates(options, &*tool)?
        }
        Command::SetExif {
            pattern,
            tag,
            src_tags,
            common,
        } => {
            let options = common.into_options(pattern, Some(src_tags), tag, TieBreak::First);
            set_dates(options, &*metadata::detect(exiftool))?
        }
        Command::Search {
            pattern,
            compare,
            move_to,
            dry_run,
        } => {
            let options = SearchOptions {
                pattern,
                compare,
                move_to,
                dry_run,
            };
            let report = datefix::search::search(&options, &*metadata::detect(exiftool))?;
            for found in &report.matches {
                match &found.destination {
                    Some(dest) => println!("{} -> {}", found.path.display(), dest.display()),
                    None => println!("{}", found.path.display()),
                }
            }
            log::info!("Found {} match(es)", report.matches.len());
            report.summary
        }
        Command::Organize {
            pattern,
            dest,
            dry_run,
        } => {
            let options = OrganizeOptions {
                pattern,
                dest_root: dest,
                dry_run,
            };
            organize::organize_by_year(&options, organize::file_date)?.summary
        }
        Command::Transcode {
            pattern,
            crf,
            max_width,
            suffix,
            move_original_to,
            dry_run,
            progress,
            ffmpeg,
        } => {
            let options = TranscodeOptions {
                crf,
                max_width,
                suffix,
                move_original_to,
                dry_run,
                ffmpeg,
            };
            datefix::transcode_all(&pattern, &options, progress)?
        }
    };

    log::info!(
        "Done: {} processed, {} applied, {} skipped, {} failed{}",
        summary.processed,
        summary.applied,
        summary.skipped,
        summary.failures.len(),
        if summary.stopped { " (stopped early)" } else { "" }
    );
    if !summary.success() {
        std::process::exit(1);
    }
    Ok(())
}
