use clap::{Parser, Subcommand};
use std::path::Path;

use bookshelf_core::config::{archive_limits_from_config, config_path, init_config, load_config, AppConfig};
use bookshelf_core::document::{BookFormat, DocumentContent, ParsedDocument, TocNode};
use bookshelf_core::encoding::decode_text;
use bookshelf_core::epub;
use bookshelf_core::markdown::{self, parse_frontmatter, render_markdown};
use bookshelf_core::position::{self, PositionSnapshot, ReadingSurface};
use bookshelf_core::settings::{ContentWidth, FontFamily, JsonSettingsStore, ReaderSettings, SettingsStore};

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "bookshelf")]
#[command(about = "Inspect and render books the way the bookshelf reader does")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show EPUB metadata (title, author, description, cover)
    Metadata {
        /// EPUB file
        #[arg(required = true)]
        input: String,

        /// Write the cover image to this path
        #[arg(long)]
        cover: Option<String>,
    },

    /// Render Markdown to HTML
    Markdown {
        /// Markdown file
        #[arg(required = true)]
        input: String,

        /// Print the heading outline instead of HTML
        #[arg(long)]
        headings: bool,
    },

    /// Print the table of contents of a Markdown or EPUB file
    Toc {
        #[arg(required = true)]
        input: String,
    },

    /// Show a plain-text file the way the chunked reader reveals it
    Text {
        #[arg(required = true)]
        input: String,

        /// Number of growth steps after the first chunk
        #[arg(long, default_value = "0")]
        grow: usize,

        /// Reveal the whole text
        #[arg(long)]
        all: bool,

        /// Render HTML with the saved reader settings
        #[arg(long)]
        html: bool,
    },

    /// Capture or resolve bookmark positions
    Position {
        #[command(subcommand)]
        action: PositionAction,
    },

    /// Show or change reader settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Manage config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum PositionAction {
    /// Build a position payload from scroll metrics
    Capture {
        #[arg(long)]
        chapter: Option<String>,
        #[arg(long)]
        scroll_y: f64,
        #[arg(long)]
        document_height: f64,
        #[arg(long)]
        viewport_height: f64,
    },
    /// Work out where a stored payload navigates to
    Resolve {
        /// Position payload (JSON object)
        payload: String,
        /// Chapter currently shown
        #[arg(long)]
        current: Option<String>,
        /// Scrollable height of the content after the switch
        #[arg(long)]
        scrollable_height: f64,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print current settings
    Show,
    /// Set a setting (fontSize, fontFamily, lineHeight, contentWidth, sidebarOpen)
    Set { key: String, value: String },
    /// Restore font size, line height and font family
    Reset,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write default config file
    Init,
    /// Print current config
    Show,
    /// Set a config value (e.g. reader.chunk_size 20000)
    Set { key: String, value: String },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Metadata { input, cover } => run_metadata(input, cover.as_deref(), cli.json),
        Commands::Markdown { input, headings } => run_markdown(input, *headings, cli.json),
        Commands::Toc { input } => run_toc(input, cli.json),
        Commands::Text { input, grow, all, html } => run_text(input, *grow, *all, *html, cli.json),
        Commands::Position { action } => run_position(action, cli.json),
        Commands::Settings { action } => run_settings(action, cli.json),
        Commands::Config { action } => run_config(action, cli.json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn read_text_file(path: &Path) -> Result<String, std::io::Error> {
    Ok(decode_text(&std::fs::read(path)?))
}

fn run_metadata(input: &str, cover_out: Option<&str>, json: bool) -> CliResult {
    let bytes = std::fs::read(input)?;
    let limits = archive_limits_from_config(&load_config().security);
    let meta = epub::parse_epub_metadata_with(&bytes, &limits);

    if let (Some(out), Some(cover)) = (cover_out, meta.cover.as_ref()) {
        std::fs::write(out, &cover.bytes)?;
        if !json {
            println!("Wrote cover ({}) to {}", cover.mime_type, out);
        }
    } else if cover_out.is_some() && !json {
        eprintln!("No cover image found");
    }

    if json {
        let info = serde_json::json!({
            "metadata": meta,
            "coverMimeType": meta.cover_mime_type(),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }
    if meta.is_empty() {
        println!("No metadata found.");
        return Ok(());
    }
    let fields = [
        ("Title", &meta.title),
        ("Author", &meta.author),
        ("Publisher", &meta.publisher),
        ("Language", &meta.language),
        ("Published", &meta.pubdate),
        ("Description", &meta.description),
    ];
    for (label, value) in fields {
        if let Some(v) = value {
            println!("{}: {}", label, v);
        }
    }
    if let Some(mime) = meta.cover_mime_type() {
        println!("Cover: {}", mime);
    }
    Ok(())
}

fn run_markdown(input: &str, headings: bool, json: bool) -> CliResult {
    let source = read_text_file(Path::new(input))?;
    let (_, body) = parse_frontmatter(&source);
    let rendered = render_markdown(body);
    if json {
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else if headings {
        for h in &rendered.headings {
            println!("{}{} (#{})", "  ".repeat(usize::from(h.level.saturating_sub(1))), h.text, h.id);
        }
    } else {
        println!("{}", rendered.html);
    }
    Ok(())
}

fn load_for_toc(path: &Path) -> Result<ParsedDocument, Box<dyn std::error::Error + Send + Sync>> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    tracing::debug!(path = %path.display(), ext, "Loading document for table of contents");
    match BookFormat::from_extension(ext) {
        Some(BookFormat::Markdown) => Ok(markdown::load_document(&read_text_file(path)?)),
        Some(BookFormat::Epub) => {
            let limits = archive_limits_from_config(&load_config().security);
            Ok(epub::load_document_with(&std::fs::read(path)?, &limits)?)
        }
        Some(BookFormat::Txt) => Ok(ParsedDocument::empty(DocumentContent::Text(read_text_file(path)?))),
        Some(BookFormat::Pdf) | None => Err(format!("No table of contents for {}", path.display()).into()),
    }
}

fn print_toc(nodes: &[TocNode], depth: usize) {
    for node in nodes {
        println!("{}{} -> {}", "  ".repeat(depth), node.title, node.anchor);
        print_toc(&node.children, depth + 1);
    }
}

fn run_toc(input: &str, json: bool) -> CliResult {
    let doc = load_for_toc(Path::new(input))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&doc.table_of_contents)?);
    } else if doc.table_of_contents.is_empty() {
        println!("No table of contents.");
    } else {
        // Markdown TOCs are flat; indent them by heading level instead.
        let flat = doc.table_of_contents.iter().all(|n| n.children.is_empty());
        if flat {
            for node in &doc.table_of_contents {
                println!("{}{} -> {}", "  ".repeat(usize::from(node.level.saturating_sub(1))), node.title, node.anchor);
            }
        } else {
            print_toc(&doc.table_of_contents, 0);
        }
    }
    Ok(())
}

fn run_text(input: &str, grow: usize, all: bool, html: bool, json: bool) -> CliResult {
    let cfg = load_config();
    let mut window = cfg.reader.chunked_text(read_text_file(Path::new(input))?);
    if all {
        window.load_all();
    } else {
        for _ in 0..grow {
            window.grow();
        }
    }
    tracing::debug!(visible = window.visible_len(), total = window.total_len(), "Text window");

    if json {
        let info = serde_json::json!({
            "visibleChars": window.visible_len(),
            "totalChars": window.total_len(),
            "hasMore": window.has_more(),
            "progress": window.progress_percent(),
            "blocks": window.blocks(),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else if html {
        let settings = JsonSettingsStore::default_location()
            .map(|s| s.load_or_default())
            .unwrap_or_default();
        println!("{}", window.render_html(&settings));
    } else {
        println!("{}", window.visible_text());
        if window.has_more() {
            eprintln!(
                "-- {}/{} characters ({}%), use --grow or --all for more --",
                window.visible_len(),
                window.total_len(),
                window.progress_percent()
            );
        }
    }
    Ok(())
}

fn run_position(action: &PositionAction, json: bool) -> CliResult {
    match action {
        PositionAction::Capture {
            chapter,
            scroll_y,
            document_height,
            viewport_height,
        } => {
            let snap = position::capture(chapter.as_deref(), *scroll_y, *document_height, *viewport_height);
            println!("{}", snap.to_payload()?);
        }
        PositionAction::Resolve {
            payload,
            current,
            scrollable_height,
        } => {
            let snap = PositionSnapshot::from_payload(payload)?;
            let plan = position::plan(&snap, current.as_deref());
            let settle_delay = load_config().reader.settle_delay();
            let mut surface = DryRunSurface {
                scrollable_height: *scrollable_height,
            };
            let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
            let outcome = runtime.block_on(position::navigate(&snap, current.as_deref(), &mut surface, |anchor| {
                tracing::debug!(anchor, ?settle_delay, "Waiting for chapter to settle");
                tokio::time::sleep(settle_delay)
            }));
            let offset = outcome.scrolled_to;
            if json {
                let info = serde_json::json!({
                    "switchTo": plan.switch_to,
                    "seek": plan.seek,
                    "offset": offset,
                });
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else if plan.is_noop() {
                println!("Nothing to do.");
            } else {
                if let Some(anchor) = &plan.switch_to {
                    println!("Switch to chapter: {}", anchor);
                }
                if let Some(y) = offset {
                    println!("Scroll to: {}", y);
                }
            }
        }
    }
    Ok(())
}

/// Surface with no real view behind it; the outcome of `navigate` is printed.
struct DryRunSurface {
    scrollable_height: f64,
}

impl ReadingSurface for DryRunSurface {
    fn switch_chapter(&mut self, _anchor: &str) {}

    fn scrollable_height(&self) -> f64 {
        self.scrollable_height
    }

    fn scroll_to(&mut self, _y: f64) {}
}

fn settings_store() -> Result<JsonSettingsStore, Box<dyn std::error::Error + Send + Sync>> {
    Ok(JsonSettingsStore::default_location()?)
}

fn print_settings(settings: &ReaderSettings, json: bool) -> CliResult {
    if json {
        println!("{}", serde_json::to_string_pretty(settings)?);
    } else {
        println!("Font size: {}px", settings.font_size);
        println!("Font: {} ({})", settings.font_family.label(), settings.font_family.as_str());
        println!("Line height: {}", settings.line_height);
        println!("Width: {}", settings.content_width.as_str());
        println!("Sidebar: {}", if settings.sidebar_open { "open" } else { "closed" });
    }
    Ok(())
}

fn run_settings(action: &SettingsAction, json: bool) -> CliResult {
    let store = settings_store()?;
    let mut settings = store.load_or_default();
    match action {
        SettingsAction::Show => return print_settings(&settings, json),
        SettingsAction::Set { key, value } => set_setting(&mut settings, key, value)?,
        SettingsAction::Reset => settings.reset_typography(),
    }
    store.save(&settings)?;
    print_settings(&settings, json)
}

fn set_setting(settings: &mut ReaderSettings, key: &str, value: &str) -> CliResult {
    match key {
        "fontSize" | "font_size" => settings.set_font_size(value.parse()?),
        "lineHeight" | "line_height" => settings.set_line_height(value.parse()?),
        "fontFamily" | "font_family" => {
            settings.font_family = FontFamily::parse(value).ok_or_else(|| format!("Unknown font: {}", value))?
        }
        "contentWidth" | "content_width" => {
            settings.content_width =
                ContentWidth::parse(value).ok_or_else(|| format!("Unknown width: {}", value))?
        }
        "sidebarOpen" | "sidebar_open" => settings.sidebar_open = value.parse()?,
        _ => return Err(format!("Unknown setting: {}", key).into()),
    }
    Ok(())
}

fn run_config(action: &ConfigAction, json: bool) -> CliResult {
    match action {
        ConfigAction::Init => {
            let path = config_path().ok_or("Could not determine config directory")?;
            if init_config(&path)? {
                println!("Wrote default config to {}", path.display());
            } else {
                println!("Config already exists at {}", path.display());
            }
        }
        ConfigAction::Show => {
            let cfg = load_config();
            if json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else {
                println!("{}", toml::to_string_pretty(&cfg)?);
            }
        }
        ConfigAction::Set { key, value } => {
            let path = config_path().ok_or("Could not determine config directory")?;
            let mut cfg = load_config();
            set_config_key(&mut cfg, key, value)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, toml::to_string_pretty(&cfg)?)?;
            if !json {
                println!("Updated {}", key);
            }
        }
    }
    Ok(())
}

fn set_config_key(cfg: &mut AppConfig, key: &str, value: &str) -> CliResult {
    let parts: Vec<&str> = key.splitn(2, '.').collect();
    match parts.as_slice() {
        ["reader", sub] => match *sub {
            "chunk_size" => cfg.reader.chunk_size = value.parse()?,
            "growth_threshold" => cfg.reader.growth_threshold = value.parse()?,
            "settle_delay_ms" => cfg.reader.settle_delay_ms = value.parse()?,
            _ => return Err(format!("Unknown key: {}", key).into()),
        },
        ["security", sub] => match *sub {
            "max_archive_entries" => cfg.security.max_archive_entries = value.parse().ok(),
            "max_entry_size_mb" => cfg.security.max_entry_size_mb = value.parse().ok(),
            _ => return Err(format!("Unknown key: {}", key).into()),
        },
        ["upload", sub] => match *sub {
            "max_failed_attempts" => cfg.upload.max_failed_attempts = value.parse()?,
            "lockout_secs" => cfg.upload.lockout_secs = value.parse()?,
            "attempt_window_secs" => cfg.upload.attempt_window_secs = value.parse()?,
            "max_upload_mb" => cfg.upload.max_upload_mb = value.parse()?,
            _ => return Err(format!("Unknown key: {}", key).into()),
        },
        _ => return Err(format!("Unknown key: {}", key).into()),
    }
    Ok(())
}
