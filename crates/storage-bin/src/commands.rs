use std::io::Write;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::info;

use storage_core::{FileIdentity, Size, Storage, StorageError};
use storage_host::Device;
use storage_platform::grants::GrantFlags;
use storage_platform::media::MediaValues;

use crate::{parse_identity, Commands, GrantCommands};

/// What a command produced
pub enum Outcome {
    Json(Value),
    Bytes(Vec<u8>),
    Failed(StorageError),
}

impl Outcome {
    /// Write the outcome to stdout. Storage failures are reported as
    /// `{"error":{"kind":..,"message":..}}` with exit status 1.
    pub fn print(self) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        match self {
            Outcome::Json(value) => {
                writeln!(stdout, "{}", serde_json::to_string_pretty(&value)?)?;
            }
            Outcome::Bytes(data) => {
                stdout.write_all(&data)?;
            }
            Outcome::Failed(err) => {
                writeln!(
                    stdout,
                    "{}",
                    serde_json::to_string_pretty(&json!({ "error": err }))?
                )?;
                stdout.flush()?;
                std::process::exit(1);
            }
        }
        stdout.flush()?;
        Ok(())
    }
}

/// Run one command. Storage errors become [`Outcome::Failed`]; anything else
/// (bad arguments, unreadable input files) is returned as an error.
pub fn run(command: Commands, storage: &Storage, device: &Device) -> Result<Outcome> {
    match execute(command, storage, device)? {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            info!("operation failed: {}", err.message());
            Ok(Outcome::Failed(err))
        }
    }
}

type Attempt = std::result::Result<Outcome, StorageError>;

fn execute(command: Commands, storage: &Storage, device: &Device) -> Result<Attempt> {
    let attempt = match command {
        Commands::Resolve(target) => {
            let identity = target.identity()?;
            storage.resolve(&identity).map(|kind| json!({ "controller": kind }))
        }
        Commands::Name(target) => storage
            .get_name(&target.identity()?)
            .map(|name| json!({ "name": name })),
        Commands::Mime(target) => storage
            .get_mime_type(&target.identity()?)
            .map(|mime| json!({ "mimeType": mime })),
        Commands::Ls(target) => {
            let entries = storage.read_dir(&target.identity()?);
            entries.map(|entries| json!(entries))
        }
        Commands::Create { dir, path, mime } => storage
            .create_file(&dir.identity()?, &path, mime.as_deref())
            .map(|identity| json!(identity)),
        Commands::Rm(target) => storage
            .delete_file(&target.identity()?)
            .map(|()| json!({ "deleted": true })),
        Commands::Rmdir(target) => storage
            .delete_empty_dir(&target.identity()?)
            .map(|()| json!({ "deleted": true })),
        Commands::RmAll(target) => storage
            .delete_dir_all(&target.identity()?)
            .map(|()| json!({ "deleted": true })),
        Commands::Read { file, output } => {
            let data = match storage.read(&file.identity()?) {
                Ok(data) => data,
                Err(err) => return Ok(Err(err)),
            };
            return match output {
                Some(path) => {
                    std::fs::write(&path, &data)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    Ok(Ok(Outcome::Json(json!({ "bytes": data.len() }))))
                }
                None => Ok(Ok(Outcome::Bytes(data))),
            };
        }
        Commands::Write {
            file,
            data,
            input,
            append,
        } => {
            let bytes = read_input(data, input.as_deref())?;
            let len = bytes.len();
            let identity = file.identity()?;
            let written = if append {
                storage.append(&identity, &bytes)
            } else {
                storage.write(&identity, &bytes)
            };
            written.map(|()| json!({ "bytes": len }))
        }
        Commands::Stat(target) => storage
            .get_metadata(&target.identity()?)
            .map(|meta| json!(meta)),
        Commands::Copy {
            from,
            to,
            from_tree,
            to_tree,
        } => {
            let from = parse_identity(&from, from_tree.as_deref())?;
            let to = parse_identity(&to, to_tree.as_deref())?;
            storage.copy(&from, &to).map(|()| json!({ "copied": true }))
        }
        Commands::Thumbnail { file, size, output } => {
            let size = size.map(Size::square);
            match storage.get_thumbnail(&file.identity()?, size) {
                Ok(Some(png)) => {
                    std::fs::write(&output, &png)
                        .with_context(|| format!("failed to write {}", output.display()))?;
                    Ok(json!({ "bytes": png.len() }))
                }
                Ok(None) => Ok(json!({ "bytes": null })),
                Err(err) => Err(err),
            }
        }
        Commands::PickDir { document_id } => {
            let tree = device.pick_dir(&document_id)?;
            let root = FileIdentity::from_tree_uri(&tree)
                .with_context(|| format!("picker returned a non-tree URI {}", tree))?;
            Ok(json!(root))
        }
        Commands::PickMedia {
            collection,
            name,
            mime,
            relative_path,
            input,
        } => {
            let data = read_input(None, input.as_deref())?;
            let values = MediaValues {
                display_name: name,
                mime_type: mime,
                relative_path,
            };
            let uri =
                device.pick_media(collection.into(), &values, &data, GrantFlags::READ_WRITE)?;
            Ok(json!(FileIdentity::new(uri)))
        }
        Commands::Grants { command } => grants(command, storage)?,
    };
    Ok(attempt.map(Outcome::Json))
}

fn grants(
    command: GrantCommands,
    storage: &Storage,
) -> Result<std::result::Result<Value, StorageError>> {
    let attempt = match command {
        GrantCommands::List => storage.list_grants().map(|grants| json!(grants)),
        GrantCommands::Check { target, mode } => storage
            .check_grant(&target.identity()?, mode.into())
            .map(|granted| json!({ "granted": granted })),
        GrantCommands::Take(target) => storage
            .take_grant(&target.identity()?)
            .map(|()| json!({ "taken": true })),
        GrantCommands::Release(target) => storage
            .release_grant(&target.identity()?)
            .map(|()| json!({ "released": true })),
        GrantCommands::ReleaseAll => storage
            .release_all_grants()
            .map(|()| json!({ "released": true })),
    };
    Ok(attempt)
}

fn read_input(data: Option<String>, input: Option<&std::path::Path>) -> Result<Vec<u8>> {
    match (data, input) {
        (Some(data), _) => Ok(data.into_bytes()),
        (None, Some(path)) => {
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
        }
        (None, None) => Ok(Vec::new()),
    }
}
