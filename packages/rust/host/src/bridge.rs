//! Automation host reached through a JSON-lines bridge subprocess.
//!
//! The bridge (typically a small script driving the office application's
//! object model) announces `{"type":"ready"}` on stdout, then answers one
//! response line per request line:
//!
//! ```text
//! → {"type":"call","id":"req-1","call":{"method":"table_count","params":{"doc":1}}}
//! ← {"type":"result","id":"req-1","value":3}
//! → {"type":"shutdown"}
//! ```

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use autoformatter_shared::{AutoFormatterError, HostConfig, Result, expand_path};

use crate::{
    Alignment, AutomationHost, BorderRule, DocumentId, Edge, HostLauncher, ParagraphFormat,
    ParagraphScope, ProofingSettings,
};

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// One host operation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
enum HostCall {
    CreateDocument { template: PathBuf },
    OpenDocument { path: PathBuf },
    ClearContent { doc: DocumentId },
    InsertFile { doc: DocumentId, path: PathBuf },
    InsertPageBreak { doc: DocumentId },
    InlineImageCount { doc: DocumentId },
    TableCount { doc: DocumentId },
    TableRowCount { doc: DocumentId, table: usize },
    TocCount { doc: DocumentId },
    SetParagraphFormat { doc: DocumentId, scope: ParagraphScope, format: ParagraphFormat },
    ClearTableBorders { doc: DocumentId, table: usize },
    SetTableBorder { doc: DocumentId, table: usize, edge: Edge, rule: BorderRule },
    SetRowBorder { doc: DocumentId, table: usize, row: usize, edge: Edge, rule: BorderRule },
    SetRowAlignment { doc: DocumentId, table: usize, alignment: Alignment },
    AutofitWindow { doc: DocumentId, table: usize },
    SetProofing { doc: DocumentId, settings: ProofingSettings },
    RefreshToc { doc: DocumentId, index: usize },
    SaveAs { doc: DocumentId, path: PathBuf },
    Close { doc: DocumentId, save: bool },
}

/// Request message sent to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum RequestMessage {
    #[serde(rename = "call")]
    Call { id: String, call: HostCall },
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// Response message received from the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseMessage {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "result")]
    Result {
        id: String,
        #[serde(default)]
        value: serde_json::Value,
    },
    #[serde(rename = "error")]
    Error {
        #[allow(dead_code)]
        id: String,
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Bridge host
// ---------------------------------------------------------------------------

/// Handle to a spawned bridge subprocess.
pub struct BridgeHost {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    request_counter: u64,
    shutdown_timeout: Duration,
    quit: bool,
}

impl BridgeHost {
    /// Spawn the bridge and wait for its ready signal.
    pub fn spawn(config: &HostConfig) -> Result<Self> {
        let script = expand_path(&config.bridge_script);
        info!(cmd = %config.bridge_cmd, script = %script.display(), "spawning automation host bridge");

        let mut child = Command::new(&config.bridge_cmd)
            .arg(&script)
            .current_dir(expand_path(&config.working_dir))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Bridge logs go to parent stderr
            .spawn()
            .map_err(|e| {
                AutoFormatterError::Host(format!(
                    "failed to spawn bridge: {e}. Is `{}` installed?",
                    config.bridge_cmd
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AutoFormatterError::Host("failed to capture bridge stdin".into()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AutoFormatterError::Host("failed to capture bridge stdout".into()))?;

        let mut handle = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            request_counter: 0,
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
            quit: false,
        };

        handle.wait_for_ready()?;

        // The office application may still be settling after the bridge reports ready.
        if config.startup_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(config.startup_delay_ms));
        }

        Ok(handle)
    }

    fn wait_for_ready(&mut self) -> Result<()> {
        let line = self.read_line()?;

        let msg: ResponseMessage = serde_json::from_str(line.trim()).map_err(|e| {
            AutoFormatterError::Host(format!("invalid bridge ready message: {e} (got: {line})"))
        })?;

        match msg {
            ResponseMessage::Ready => {
                info!("automation host is ready");
                Ok(())
            }
            // Typical cause: a modal dialog in the office application.
            ResponseMessage::Error { error, .. } => Err(AutoFormatterError::Host(format!(
                "automation host failed to start: {error}"
            ))),
            ResponseMessage::Result { .. } => Err(AutoFormatterError::Host(format!(
                "expected ready message, got: {line}"
            ))),
        }
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| AutoFormatterError::Host(format!("bridge read error: {e}")))?;

        if line.is_empty() {
            return Err(AutoFormatterError::Host("bridge closed stdout unexpectedly".into()));
        }
        Ok(line)
    }

    fn send(&mut self, request: &RequestMessage) -> Result<()> {
        let json = serde_json::to_string(request)
            .map_err(|e| AutoFormatterError::Host(format!("failed to serialize request: {e}")))?;

        writeln!(self.stdin, "{json}")
            .map_err(|e| AutoFormatterError::Host(format!("failed to write to bridge stdin: {e}")))?;
        self.stdin
            .flush()
            .map_err(|e| AutoFormatterError::Host(format!("failed to flush bridge stdin: {e}")))
    }

    /// Send one call and wait for its reply value.
    fn request(&mut self, call: HostCall) -> Result<serde_json::Value> {
        if self.quit {
            return Err(AutoFormatterError::Host("host has quit".into()));
        }

        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);
        debug!(%id, ?call, "host call");

        self.send(&RequestMessage::Call { id: id.clone(), call })?;
        let line = self.read_line()?;

        let msg: ResponseMessage = serde_json::from_str(line.trim()).map_err(|e| {
            AutoFormatterError::Host(format!(
                "invalid bridge response: {e} (got: {})",
                line.trim_end().chars().take(200).collect::<String>()
            ))
        })?;

        match msg {
            ResponseMessage::Result { id: resp_id, value } => {
                if resp_id != id {
                    return Err(AutoFormatterError::Host(format!(
                        "bridge answered {resp_id}, expected {id}"
                    )));
                }
                Ok(value)
            }
            ResponseMessage::Error { error, .. } => Err(AutoFormatterError::Host(error)),
            ResponseMessage::Ready => Err(AutoFormatterError::Host(
                "unexpected ready message during a call".into(),
            )),
        }
    }

    fn call<T: DeserializeOwned>(&mut self, call: HostCall) -> Result<T> {
        let value = self.request(call)?;
        serde_json::from_value(value)
            .map_err(|e| AutoFormatterError::Host(format!("unexpected bridge reply: {e}")))
    }

    fn call_unit(&mut self, call: HostCall) -> Result<()> {
        self.request(call).map(|_| ())
    }
}

impl AutomationHost for BridgeHost {
    fn create_document(&mut self, template: &Path) -> Result<DocumentId> {
        self.call(HostCall::CreateDocument { template: template.to_path_buf() })
    }

    fn open_document(&mut self, path: &Path) -> Result<DocumentId> {
        self.call(HostCall::OpenDocument { path: path.to_path_buf() })
    }

    fn clear_content(&mut self, doc: DocumentId) -> Result<()> {
        self.call_unit(HostCall::ClearContent { doc })
    }

    fn insert_file(&mut self, doc: DocumentId, path: &Path) -> Result<()> {
        self.call_unit(HostCall::InsertFile { doc, path: path.to_path_buf() })
    }

    fn insert_page_break(&mut self, doc: DocumentId) -> Result<()> {
        self.call_unit(HostCall::InsertPageBreak { doc })
    }

    fn inline_image_count(&mut self, doc: DocumentId) -> Result<usize> {
        self.call(HostCall::InlineImageCount { doc })
    }

    fn table_count(&mut self, doc: DocumentId) -> Result<usize> {
        self.call(HostCall::TableCount { doc })
    }

    fn table_row_count(&mut self, doc: DocumentId, table: usize) -> Result<usize> {
        self.call(HostCall::TableRowCount { doc, table })
    }

    fn toc_count(&mut self, doc: DocumentId) -> Result<usize> {
        self.call(HostCall::TocCount { doc })
    }

    fn set_paragraph_format(
        &mut self,
        doc: DocumentId,
        scope: ParagraphScope,
        format: ParagraphFormat,
    ) -> Result<()> {
        self.call_unit(HostCall::SetParagraphFormat { doc, scope, format })
    }

    fn clear_table_borders(&mut self, doc: DocumentId, table: usize) -> Result<()> {
        self.call_unit(HostCall::ClearTableBorders { doc, table })
    }

    fn set_table_border(&mut self, doc: DocumentId, table: usize, edge: Edge, rule: BorderRule) -> Result<()> {
        self.call_unit(HostCall::SetTableBorder { doc, table, edge, rule })
    }

    fn set_row_border(
        &mut self,
        doc: DocumentId,
        table: usize,
        row: usize,
        edge: Edge,
        rule: BorderRule,
    ) -> Result<()> {
        self.call_unit(HostCall::SetRowBorder { doc, table, row, edge, rule })
    }

    fn set_row_alignment(&mut self, doc: DocumentId, table: usize, alignment: Alignment) -> Result<()> {
        self.call_unit(HostCall::SetRowAlignment { doc, table, alignment })
    }

    fn autofit_window(&mut self, doc: DocumentId, table: usize) -> Result<()> {
        self.call_unit(HostCall::AutofitWindow { doc, table })
    }

    fn set_proofing(&mut self, doc: DocumentId, settings: ProofingSettings) -> Result<()> {
        self.call_unit(HostCall::SetProofing { doc, settings })
    }

    fn refresh_toc(&mut self, doc: DocumentId, index: usize) -> Result<()> {
        self.call_unit(HostCall::RefreshToc { doc, index })
    }

    fn save_as(&mut self, doc: DocumentId, path: &Path) -> Result<()> {
        self.call_unit(HostCall::SaveAs { doc, path: path.to_path_buf() })
    }

    fn close(&mut self, doc: DocumentId, save: bool) -> Result<()> {
        self.call_unit(HostCall::Close { doc, save })
    }

    /// Send shutdown and wait for the bridge to exit, killing it once the
    /// shutdown timeout has passed.
    fn quit(&mut self) -> Result<()> {
        if self.quit {
            return Ok(());
        }
        self.quit = true;

        let _ = self.send(&RequestMessage::Shutdown);

        let deadline = Instant::now() + self.shutdown_timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    info!(?status, "automation host bridge exited");
                    return Ok(());
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Ok(None) => {
                    warn!(
                        timeout_ms = self.shutdown_timeout.as_millis() as u64,
                        "bridge ignored shutdown, killing it"
                    );
                    break;
                }
                Err(e) => {
                    warn!("bridge wait error: {e}");
                    break;
                }
            }
        }

        if let Err(e) = self.child.kill() {
            debug!("bridge kill failed: {e}");
        }
        if let Err(e) = self.child.wait() {
            warn!("bridge wait error: {e}");
        }
        Ok(())
    }
}

impl Drop for BridgeHost {
    fn drop(&mut self) {
        // Never leave an orphaned host holding file locks.
        if !self.quit {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Spawns one [`BridgeHost`] per build.
#[derive(Debug, Clone)]
pub struct BridgeLauncher {
    config: HostConfig,
}

impl BridgeLauncher {
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }
}

impl HostLauncher for BridgeLauncher {
    fn launch(&self) -> Result<Box<dyn AutomationHost>> {
        Ok(Box::new(BridgeHost::spawn(&self.config)?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LineWidth;

    #[test]
    fn call_message_serializes_correctly() {
        let msg = RequestMessage::Call {
            id: "req-1".into(),
            call: HostCall::TableCount { doc: DocumentId(1) },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"call","id":"req-1","call":{"method":"table_count","params":{"doc":1}}}"#
        );
    }

    #[test]
    fn border_call_carries_rule() {
        let call = HostCall::SetTableBorder {
            doc: DocumentId(2),
            table: 0,
            edge: Edge::Top,
            rule: BorderRule::single(LineWidth::Thick),
        };
        let json = serde_json::to_string(&call).unwrap();
        assert!(json.contains(r#""method":"set_table_border""#));
        assert!(json.contains(r#""edge":"top""#));
        assert!(json.contains(r#""width":"thick""#));
    }

    #[test]
    fn shutdown_message_serializes_correctly() {
        let json = serde_json::to_string(&RequestMessage::Shutdown).unwrap();
        assert_eq!(json, r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn response_message_deserializes_result() {
        let json = r#"{"type":"result","id":"req-4","value":3}"#;
        match serde_json::from_str::<ResponseMessage>(json).unwrap() {
            ResponseMessage::Result { id, value } => {
                assert_eq!(id, "req-4");
                assert_eq!(value, serde_json::json!(3));
            }
            other => panic!("expected Result, got {other:?}"),
        }
    }

    #[test]
    fn response_without_value_is_null() {
        let json = r#"{"type":"result","id":"req-1"}"#;
        match serde_json::from_str::<ResponseMessage>(json).unwrap() {
            ResponseMessage::Result { value, .. } => assert!(value.is_null()),
            other => panic!("expected Result, got {other:?}"),
        }
    }

    #[test]
    fn spawn_failure_names_the_command() {
        let config = HostConfig {
            bridge_cmd: "autoformatter-no-such-interpreter".into(),
            bridge_script: "bridge.py".into(),
            working_dir: ".".into(),
            startup_delay_ms: 0,
            shutdown_timeout_ms: 1_000,
        };
        let err = BridgeHost::spawn(&config).err().expect("spawn must fail");
        assert!(err.to_string().contains("autoformatter-no-such-interpreter"));
    }

    #[cfg(unix)]
    #[test]
    fn scripted_bridge_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("bridge.sh");
        std::fs::write(
            &script,
            r#"echo '{"type":"ready"}'
n=0
while IFS= read -r line; do
  case "$line" in
    *'"type":"shutdown"'*) exit 0 ;;
  esac
  n=$((n+1))
  case "$line" in
    *'"method":"table_count"'*) echo "{\"type\":\"result\",\"id\":\"req-$n\",\"value\":3}" ;;
    *'"method":"insert_file"'*) echo "{\"type\":\"error\",\"id\":\"req-$n\",\"error\":\"file is corrupt\"}" ;;
    *) echo "{\"type\":\"result\",\"id\":\"req-$n\",\"value\":1}" ;;
  esac
done
"#,
        )
        .unwrap();

        let config = HostConfig {
            bridge_cmd: "sh".into(),
            bridge_script: script.to_string_lossy().into_owned(),
            working_dir: tmp.path().to_string_lossy().into_owned(),
            startup_delay_ms: 0,
            shutdown_timeout_ms: 1_000,
        };

        let mut host = BridgeHost::spawn(&config).unwrap();
        let doc = host.create_document(Path::new("/t/reference.docx")).unwrap();
        assert_eq!(doc, DocumentId(1));
        assert_eq!(host.table_count(doc).unwrap(), 3);
        host.clear_content(doc).unwrap();

        let err = host.insert_file(doc, Path::new("/t/x.docx")).unwrap_err();
        assert_eq!(err.to_string(), "automation host error: file is corrupt");

        host.quit().unwrap();
        assert!(host.table_count(doc).is_err());
    }

    #[cfg(unix)]
    fn scripted(tmp: &Path, body: &str, shutdown_timeout_ms: u64) -> BridgeHost {
        let script = tmp.join("bridge.sh");
        std::fs::write(&script, body).unwrap();
        let config = HostConfig {
            bridge_cmd: "sh".into(),
            bridge_script: script.to_string_lossy().into_owned(),
            working_dir: tmp.to_string_lossy().into_owned(),
            startup_delay_ms: 0,
            shutdown_timeout_ms,
        };
        BridgeHost::spawn(&config).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn garbled_multibyte_reply_is_a_host_error() {
        let tmp = tempfile::tempdir().unwrap();
        let noise = format!("{}中文错误信息", "a".repeat(199));
        let mut host = scripted(
            tmp.path(),
            &format!("echo '{{\"type\":\"ready\"}}'\nwhile IFS= read -r line; do echo '{noise}'; done\n"),
            1_000,
        );

        let err = host.table_count(DocumentId(1)).unwrap_err();
        assert!(matches!(err, AutoFormatterError::Host(_)), "got {err:?}");
        let message = err.to_string();
        assert!(message.contains("invalid bridge response"));
        assert!(message.contains('中'));
        host.quit().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn bridge_ignoring_shutdown_is_killed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut host = scripted(
            tmp.path(),
            "echo '{\"type\":\"ready\"}'\nwhile IFS= read -r line; do :; done\n",
            200,
        );

        let started = Instant::now();
        host.quit().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(host.child.try_wait().unwrap().is_some());
    }
}
