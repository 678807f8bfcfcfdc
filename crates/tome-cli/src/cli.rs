use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tome", about = "Tome: campaign notes, kept safe", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the campaign (overrides the config file)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// TOML config file (default: ./tome.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Summarize the stored campaign
    Status(StatusArgs),
    /// Write a backup bundle
    Export(ExportArgs),
    /// Replace the campaign with a backup bundle
    Import(ImportArgs),
    /// Delete the whole campaign
    Reset(ResetArgs),
    /// Store an image and assign it to a slot
    PutImage(PutImageArgs),
    /// List or edit maps
    Maps(MapsArgs),
    /// Dry-run the migrator on a snapshot without writing anything
    MigrateCheck(MigrateCheckArgs),
}

#[derive(Args)]
pub struct StatusArgs {}

#[derive(Args)]
pub struct ExportArgs {
    /// Output file (default: tome-backup-<date>.json)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct ImportArgs {
    pub file: PathBuf,
    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct ResetArgs {
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct PutImageArgs {
    pub file: PathBuf,
    /// character | npc:<id> | party:<id> | location:<id> | map-bg:<map> | map-drawing:<map>
    #[arg(long)]
    pub slot: String,
}

#[derive(Args)]
pub struct MapsArgs {
    #[command(subcommand)]
    pub action: Option<MapsAction>,
}

#[derive(Subcommand)]
pub enum MapsAction {
    Add { name: String },
    Rename { id: String, name: String },
    Select { id: String },
    Delete { id: String },
}

#[derive(Args)]
pub struct MigrateCheckArgs {
    /// Snapshot file to check (default: the stored snapshot)
    pub file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status() {
        let cli = Cli::try_parse_from(["tome", "status"]).unwrap();
        assert!(matches!(cli.command, Command::Status(_)));
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn parse_global_flags_after_command() {
        let cli =
            Cli::try_parse_from(["tome", "status", "--data-dir", "/tmp/c", "-v", "--format", "json"])
                .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/c")));
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn parse_import_yes() {
        let cli = Cli::try_parse_from(["tome", "import", "b.json", "-y"]).unwrap();
        if let Command::Import(args) = cli.command {
            assert!(args.yes);
            assert_eq!(args.file, PathBuf::from("b.json"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_put_image() {
        let cli =
            Cli::try_parse_from(["tome", "put-image", "a.png", "--slot", "npc:n1"]).unwrap();
        if let Command::PutImage(args) = cli.command {
            assert_eq!(args.slot, "npc:n1");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_maps_rename() {
        let cli = Cli::try_parse_from(["tome", "maps", "rename", "map-1", "Crypt"]).unwrap();
        if let Command::Maps(args) = cli.command {
            assert!(matches!(
                args.action,
                Some(MapsAction::Rename { ref id, ref name }) if id == "map-1" && name == "Crypt"
            ));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_migrate_check() {
        let cli = Cli::try_parse_from(["tome", "migrate-check", "old.json"]).unwrap();
        assert!(matches!(cli.command, Command::MigrateCheck(ref a) if a.file.is_some()));
    }

    #[test]
    fn import_requires_file() {
        assert!(Cli::try_parse_from(["tome", "import"]).is_err());
    }
}
