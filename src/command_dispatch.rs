//! Purpose: Hold top-level CLI command dispatch for `recstore`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every command that opens a store closes it before returning success.
//! Invariants: Helpers in `main.rs` remain the source of output and error formatting.

use super::*;
use recstore::api::{default_export_file_name, export, export_to_path, verify_store};

pub(super) fn dispatch_command(command: Command, ctx: &Context) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "recstore", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output();
            Ok(RunOutcome::ok())
        }
        Command::Init { store } => {
            let opened = ctx.create(&store)?;
            let info = opened.info()?;
            opened.close()?;
            emit_json(json!({
                "created": {
                    "store": store_label(opened.path()),
                    "path": info.path.display().to_string(),
                    "seq": info.seq,
                }
            }));
            Ok(RunOutcome::ok())
        }
        Command::Put {
            store,
            id,
            data,
            file,
            create,
        } => {
            let payload = read_payload(data, file)?;
            let opened = if create {
                ctx.open_or_create(&store, "put")?
            } else {
                ctx.open(&store, "put")?
            };
            let version = opened.put(&id, &payload)?;
            let seq = opened.seq();
            opened.close()?;
            emit_json(json!({ "id": id, "version": version, "seq": seq }));
            Ok(RunOutcome::ok())
        }
        Command::Get { store, id } => {
            let opened = ctx.open(&store, "get")?;
            let record = opened.get(&id)?;
            opened.close()?;
            let mut value = record.to_json();
            if let Some(obj) = value.as_object_mut() {
                obj.insert("seq".to_string(), json!(record.seq()));
            }
            emit_json(value);
            Ok(RunOutcome::ok())
        }
        Command::Delete { store, id } => {
            let opened = ctx.open(&store, "delete")?;
            let deleted = opened.delete(&id)?;
            let seq = opened.seq();
            opened.close()?;
            emit_json(json!({ "id": id, "deleted": deleted, "seq": seq }));
            Ok(RunOutcome::ok())
        }
        Command::Info { store } => {
            let opened = ctx.open(&store, "info")?;
            let info = opened.info()?;
            let recovery = serde_json::to_value(opened.recovery_report()).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode recovery report")
                    .with_source(err)
            })?;
            opened.close()?;
            emit_json(json!({
                "store": store_label(&info.path),
                "path": info.path.display().to_string(),
                "phase": info.phase,
                "records": info.records,
                "seq": info.seq,
                "journal_bytes": info.journal_bytes,
                "recovery": recovery,
            }));
            Ok(RunOutcome::ok())
        }
        Command::Export {
            store,
            format,
            errors,
            out,
            out_dir,
        } => {
            let opened = ctx.open(&store, "export")?;
            let snapshot = opened.snapshot()?;
            // The snapshot stays valid after close; release the lock before serializing.
            opened.close()?;
            let options = export_options(format, errors);

            let target = match (out, out_dir) {
                (Some(path), _) => Some(path),
                (None, Some(dir)) => Some(dir.join(default_export_file_name(
                    &store_label(opened.path()),
                    snapshot.seq(),
                    options.format,
                ))),
                (None, None) => None,
            };

            let result = match &target {
                Some(path) => export_to_path(&snapshot, options, path)?,
                None => export(&snapshot, options)?,
            };
            emit_skip_notices(opened.path(), &result.failures);

            match target {
                Some(path) => emit_json(json!({
                    "path": path.display().to_string(),
                    "format": result.format,
                    "seq": result.snapshot_seq,
                    "exported": result.exported,
                    "skipped": result.failures.len(),
                })),
                None => write_stdout(&result.bytes)?,
            }
            Ok(RunOutcome::ok())
        }
        Command::Verify { store } => {
            let path = ctx.store_path(&store);
            let report =
                verify_store(&path, ctx.wait).map_err(|err| add_missing_store_hint(err, &store))?;
            let value = serde_json::to_value(&report).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode verify report")
                    .with_source(err)
            })?;
            emit_json(value);
            Ok(RunOutcome::with_code(verify_exit_code(&report)))
        }
    }
}
