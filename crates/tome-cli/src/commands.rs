use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use tome_sdk::{
    suggested_file_name, AlwaysConfirm, BlobRecord, BlobSlot, Campaign, CampaignStores, Confirm,
    LoadReport, LogSink, MapId, NoOpHook, StatusSink,
};
use tome_types::AppState;

use crate::cli::*;
use crate::config::TomeConfig;

/// Prints status text to stderr so stdout stays machine-readable.
struct ConsoleSink;

impl StatusSink for ConsoleSink {
    fn set_status(&self, message: &str) {
        eprintln!("{} {}", "»".dimmed(), message.dimmed());
    }
}

/// Asks on the terminal; anything but `y`/`yes` declines.
struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        eprint!("{} {} [y/N] ", "?".yellow().bold(), prompt);
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

fn confirmer(yes: bool) -> Box<dyn Confirm> {
    if yes {
        Box::new(AlwaysConfirm)
    } else {
        Box::new(StdinConfirm)
    }
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = TomeConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir.clone() {
        config.storage.data_dir = dir;
    }
    let ctx = Ctx {
        config,
        format: cli.format,
    };

    match cli.command {
        Command::Status(_) => cmd_status(&ctx).await,
        Command::Export(args) => cmd_export(&ctx, args).await,
        Command::Import(args) => cmd_import(&ctx, args).await,
        Command::Reset(args) => cmd_reset(&ctx, args).await,
        Command::PutImage(args) => cmd_put_image(&ctx, args).await,
        Command::Maps(args) => cmd_maps(&ctx, args).await,
        Command::MigrateCheck(args) => cmd_migrate_check(&ctx, args).await,
    }
}

struct Ctx {
    config: TomeConfig,
    format: OutputFormat,
}

impl Ctx {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    async fn stores(&self) -> anyhow::Result<CampaignStores> {
        let dir = &self.config.storage.data_dir;
        CampaignStores::open_dir(dir)
            .await
            .with_context(|| format!("opening campaign in {}", dir.display()))
    }

    async fn open(&self) -> anyhow::Result<(Campaign, LoadReport)> {
        let stores = self.stores().await?;
        // JSON output keeps status text out of the terminal and in the log.
        let sink: Arc<dyn StatusSink> = if self.json() {
            Arc::new(LogSink)
        } else {
            Arc::new(ConsoleSink)
        };
        let (campaign, report) = Campaign::open(stores, self.config.campaign(), sink).await?;
        tracing::debug!(?report, "campaign loaded");
        Ok((campaign, report))
    }
}

/// Parse `character`, `npc:<id>`, `party:<id>`, `location:<id>`,
/// `map-bg:<map>` or `map-drawing:<map>`.
pub fn parse_slot(raw: &str) -> anyhow::Result<BlobSlot> {
    if raw == "character" {
        return Ok(BlobSlot::CharacterPortrait);
    }
    let Some((kind, id)) = raw.split_once(':') else {
        bail!("unknown slot `{raw}`");
    };
    if id.is_empty() {
        bail!("slot `{raw}` is missing an id");
    }
    let entity = |section: &str| BlobSlot::EntityPortrait {
        section: section.to_string(),
        id: id.to_string(),
    };
    Ok(match kind {
        "npc" => entity("npcs"),
        "party" => entity("party"),
        "location" => entity("locations"),
        "map-bg" => BlobSlot::MapBackground(MapId::new(id)),
        "map-drawing" => BlobSlot::MapDrawing(MapId::new(id)),
        _ => bail!("unknown slot kind `{kind}`"),
    })
}

fn summary(state: &AppState) -> serde_json::Value {
    let refs = state.blob_refs().len();
    json!({
        "schemaVersion": state.schema_version,
        "character": state.character.name,
        "npcs": state.tracker.npcs.len(),
        "party": state.tracker.party.len(),
        "locations": state.tracker.locations.len(),
        "maps": state.map.maps.len(),
        "activeMap": state.map.active_map_id.as_str(),
        "imageRefs": refs,
    })
}

fn print_load_report(report: &LoadReport) {
    if let Some(drift) = &report.drift {
        eprintln!("{} {}", "warning:".yellow().bold(), drift);
    }
    if report.inline_converted > 0 {
        eprintln!("  converted {} inline image(s)", report.inline_converted);
    }
    for path in &report.dangling_cleared {
        eprintln!("  cleared missing image at {}", path.dimmed());
    }
}

async fn cmd_status(ctx: &Ctx) -> anyhow::Result<()> {
    let (campaign, report) = ctx.open().await?;
    let info = campaign.read(summary)?;
    if ctx.json() {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_load_report(&report);
        println!(
            "Campaign in {}",
            ctx.config.storage.data_dir.display().to_string().bold()
        );
        println!("  Schema: v{}", info["schemaVersion"]);
        println!(
            "  Tracker: {} NPCs, {} party, {} locations",
            info["npcs"], info["party"], info["locations"]
        );
        println!(
            "  Maps: {} (active {})",
            info["maps"],
            info["activeMap"].as_str().unwrap_or_default().yellow()
        );
        println!("  Images referenced: {}", info["imageRefs"]);
        println!("  Save: {}", campaign.status().label().green());
    }
    campaign.close()?;
    Ok(())
}

async fn cmd_export(ctx: &Ctx, args: ExportArgs) -> anyhow::Result<()> {
    let (campaign, report) = ctx.open().await?;
    print_load_report(&report);
    let (bytes, export) = campaign.export_bundle().await?;
    let out = args
        .out
        .unwrap_or_else(|| PathBuf::from(suggested_file_name(chrono::Utc::now())));
    std::fs::write(&out, &bytes).with_context(|| format!("writing {}", out.display()))?;
    campaign.close()?;

    if ctx.json() {
        let skipped: Vec<_> = export
            .skipped
            .iter()
            .map(|s| json!({ "id": s.id.as_str(), "path": s.path, "reason": s.reason }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "file": out.display().to_string(),
                "bytes": bytes.len(),
                "blobs": export.blobs,
                "texts": export.texts,
                "skipped": skipped,
            }))?
        );
    } else {
        println!(
            "{} Exported {} image(s) and {} note(s) to {}",
            "✓".green().bold(),
            export.blobs,
            export.texts,
            out.display().to_string().bold()
        );
        for s in &export.skipped {
            println!("  {} {} ({}): {}", "skipped".yellow(), s.path, s.id.short_id(), s.reason);
        }
        if export.texts_unavailable {
            println!("  {} notes store was unavailable", "warning:".yellow());
        }
    }
    Ok(())
}

async fn cmd_import(ctx: &Ctx, args: ImportArgs) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let (campaign, _) = ctx.open().await?;
    let confirm = confirmer(args.yes);
    let Some(report) = campaign
        .import_bundle(&bytes, confirm.as_ref(), &NoOpHook)
        .await?
    else {
        println!("Import cancelled.");
        return Ok(());
    };
    campaign.close()?;

    if ctx.json() {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "blobsRestored": report.blobs_restored,
                "textsRestored": report.texts_restored,
                "danglingCleared": report.dangling_cleared,
                "fromVersion": report.from_version,
                "drift": report.drift.as_ref().map(ToString::to_string),
            }))?
        );
    } else {
        println!(
            "{} Restored {} image(s) and {} note(s)",
            "✓".green().bold(),
            report.blobs_restored,
            report.texts_restored
        );
        if let Some(v) = report.from_version {
            println!("  Bundle state schema: v{v}");
        }
        for path in &report.dangling_cleared {
            println!("  cleared missing image at {}", path.dimmed());
        }
    }
    Ok(())
}

async fn cmd_reset(ctx: &Ctx, args: ResetArgs) -> anyhow::Result<()> {
    let (campaign, _) = ctx.open().await?;
    let confirm = confirmer(args.yes);
    if campaign.reset(confirm.as_ref()).await? {
        campaign.close()?;
        println!("{} Campaign deleted.", "✓".green().bold());
    } else {
        println!("Reset cancelled.");
    }
    Ok(())
}

async fn cmd_put_image(ctx: &Ctx, args: PutImageArgs) -> anyhow::Result<()> {
    let slot = parse_slot(&args.slot)?;
    let bytes =
        std::fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let Some(record) = BlobRecord::sniffed(bytes) else {
        bail!("{} is not a PNG, JPEG or WebP image", args.file.display());
    };
    let (campaign, report) = ctx.open().await?;
    print_load_report(&report);
    let id = campaign.replace_blob_ref(&slot, record).await?;
    campaign.close()?;

    if ctx.json() {
        println!("{}", json!({ "slot": args.slot, "blob": id.as_str() }));
    } else {
        println!("{} Stored {} as {}", "✓".green().bold(), args.slot, id.to_string().cyan());
    }
    Ok(())
}

async fn cmd_maps(ctx: &Ctx, args: MapsArgs) -> anyhow::Result<()> {
    let (campaign, report) = ctx.open().await?;
    print_load_report(&report);
    match args.action {
        None => {}
        Some(MapsAction::Add { name }) => {
            let id = campaign.add_map(&name)?;
            println!("{} Added map {} ({})", "✓".green().bold(), name.bold(), id);
        }
        Some(MapsAction::Rename { id, name }) => {
            campaign.rename_map(&MapId::new(id), &name)?;
            println!("{} Renamed to {}", "✓".green().bold(), name.bold());
        }
        Some(MapsAction::Select { id }) => {
            campaign.select_map(&MapId::new(&id))?;
            println!("{} Active map is now {}", "✓".green().bold(), id.yellow());
        }
        Some(MapsAction::Delete { id }) => {
            campaign.delete_map(&MapId::new(&id)).await?;
            println!("{} Deleted map {}", "✓".green().bold(), id);
        }
    }

    let maps = campaign.read(|s| {
        s.map
            .maps
            .iter()
            .map(|m| (m.id.clone(), m.name.clone(), m.id == s.map.active_map_id))
            .collect::<Vec<_>>()
    })?;
    campaign.close()?;

    if ctx.json() {
        let list: Vec<_> = maps
            .iter()
            .map(|(id, name, active)| json!({ "id": id.as_str(), "name": name, "active": active }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
    } else {
        for (id, name, active) in &maps {
            let marker = if *active { "*".green().bold() } else { " ".normal() };
            println!("{marker} {}  {}", id.to_string().dimmed(), name);
        }
    }
    Ok(())
}

async fn cmd_migrate_check(ctx: &Ctx, args: MigrateCheckArgs) -> anyhow::Result<()> {
    let document = match &args.file {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
        }
        None => match ctx.stores().await?.snapshot.read()? {
            Some(doc) => doc,
            None => {
                println!("No stored snapshot.");
                return Ok(());
            }
        },
    };

    let inline = serde_json::from_str(&document)
        .map(|raw| tome_migrate::scan_inline_images(&raw))
        .unwrap_or_default();
    let migrated = tome_migrate::migrate_str(&document, &Default::default());
    let info = summary(&migrated.state);

    if ctx.json() {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "fromVersion": migrated.from_version,
                "drift": migrated.drift.as_ref().map(ToString::to_string),
                "inlineImages": inline.iter().map(|i| i.slot.as_str()).collect::<Vec<_>>(),
                "result": info,
            }))?
        );
        return Ok(());
    }

    match migrated.from_version {
        Some(v) => println!("Stored schema: v{v} → v{}", migrated.state.schema_version),
        None => println!("Stored schema: {}", "unreadable".red()),
    }
    if let Some(drift) = &migrated.drift {
        println!("{} {}", "warning:".yellow().bold(), drift);
    }
    if !inline.is_empty() {
        println!("Inline images to convert on load: {}", inline.len());
        for image in &inline {
            println!("  {}", image.slot.dimmed());
        }
    }
    println!(
        "Result: {} maps, {} NPCs, {} party, {} locations",
        info["maps"], info["npcs"], info["party"], info["locations"]
    );
    Ok(())
}
