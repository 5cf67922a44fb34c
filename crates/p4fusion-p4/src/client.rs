use std::collections::HashMap;
use std::io::BufReader;
use std::process::{Command, Stdio};
use std::time::Duration;

use p4fusion_core::{Changelist, FileEntry};
use tracing::{debug, warn};

use crate::depot::{ClientSpec, Depot, LabelSpec, LabelSummary, PrintSink, ServerInfo, User};
use crate::error::P4Error;
use crate::marshal::{self, Record};
use crate::parse;

/// Connection settings for the `p4` command-line client.
#[derive(Debug, Clone)]
pub struct P4Config {
    pub port: String,
    pub user: String,
    pub client: String,
    /// Extra attempts after a failed command.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
    /// The client executable; normally just `p4`.
    pub program: String,
}

impl P4Config {
    pub fn new(port: &str, user: &str, client: &str) -> Self {
        Self {
            port: port.to_string(),
            user: user.to_string(),
            client: client.to_string(),
            retries: 10,
            backoff: Duration::from_secs(5),
            program: "p4".to_string(),
        }
    }
}

/// A depot connection backed by one `p4 -G` subprocess per command.
///
/// Tagged output arrives as Python marshal dictionaries on stdout; transient
/// failures are retried with a fixed backoff. Each worker thread owns its
/// own `P4Client`.
pub struct P4Client {
    config: P4Config,
}

impl P4Client {
    pub fn connect(config: P4Config) -> Self {
        Self { config }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.arg("-G")
            .args(["-p", &self.config.port])
            .args(["-u", &self.config.user])
            .args(["-c", &self.config.client])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Run a command, retrying transient failures, and collect its records.
    fn run(&mut self, args: &[&str]) -> Result<Vec<Record>, P4Error> {
        let command_name = args.first().copied().unwrap_or("p4");
        let mut last_error = None;
        for attempt in 0..=self.config.retries {
            if attempt > 0 {
                warn!(
                    command = command_name,
                    attempt,
                    "p4 command failed, retrying after backoff"
                );
                std::thread::sleep(self.config.backoff);
            }
            match self.run_once(args) {
                Ok(records) => return Ok(records),
                Err(err) => last_error = Some(err),
            }
        }
        Err(P4Error::RetriesExhausted {
            command: command_name.to_string(),
            attempts: self.config.retries + 1,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    fn run_once(&self, args: &[&str]) -> Result<Vec<Record>, P4Error> {
        let command_name = args.first().copied().unwrap_or("p4");
        let output = self
            .command(args)
            .output()
            .map_err(|source| P4Error::Spawn {
                program: self.config.program.clone(),
                source,
            })?;
        let records = marshal::read_all(&mut output.stdout.as_slice())?;
        if let Some(message) = first_error(&records) {
            return Err(P4Error::Command {
                command: command_name.to_string(),
                message,
            });
        }
        if records.is_empty() && !output.status.success() {
            return Err(P4Error::Command {
                command: command_name.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(records)
    }

    /// Run `print`, dispatching records to the sink as they arrive so file
    /// contents are never buffered whole.
    ///
    /// Spawn failures retry like any other command; once the stream has
    /// delivered a record the sink has consumed state, so later failures are
    /// fatal to the caller's changelist task.
    fn run_print(&mut self, args: &[&str], sink: &mut dyn PrintSink) -> Result<(), P4Error> {
        let mut spawn_error = None;
        for attempt in 0..=self.config.retries {
            if attempt > 0 {
                warn!(attempt, "could not start p4 print, retrying after backoff");
                std::thread::sleep(self.config.backoff);
            }
            match self.command(args).spawn() {
                Ok(child) => return self.stream_print(child, sink),
                Err(source) => {
                    spawn_error = Some(P4Error::Spawn {
                        program: self.config.program.clone(),
                        source,
                    })
                }
            }
        }
        Err(P4Error::RetriesExhausted {
            command: "print".to_string(),
            attempts: self.config.retries + 1,
            message: spawn_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    fn stream_print(
        &mut self,
        mut child: std::process::Child,
        sink: &mut dyn PrintSink,
    ) -> Result<(), P4Error> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| P4Error::Protocol("p4 print stdout not captured".to_string()))?;
        let mut reader = BufReader::new(stdout);

        let result = (|| {
            while let Some(record) = marshal::read_record(&mut reader)? {
                match record.code() {
                    "stat" => sink.on_stat().map_err(P4Error::Sink)?,
                    "text" | "binary" => {
                        let data = record.bytes_field("data").unwrap_or(&[]);
                        sink.on_output(data).map_err(P4Error::Sink)?;
                    }
                    "error" => {
                        return Err(P4Error::Command {
                            command: "print".to_string(),
                            message: record.str_field("data").unwrap_or("").trim().to_string(),
                        });
                    }
                    other => {
                        debug!(code = other, "ignoring unexpected print record");
                    }
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                let status = child.wait()?;
                if !status.success() {
                    return Err(P4Error::Command {
                        command: "print".to_string(),
                        message: format!("p4 print exited with {status}"),
                    });
                }
                Ok(())
            }
            Err(err) => {
                // Reap the child; the stream is already poisoned.
                let _ = child.kill();
                let _ = child.wait();
                Err(err)
            }
        }
    }
}

/// Severity at or above which an `error` record fails the command
/// (E_FAILED in the server's taxonomy).
const SEVERITY_FAILED: i32 = 3;

fn first_error(records: &[Record]) -> Option<String> {
    records
        .iter()
        .filter(|r| r.code() == "error")
        .find(|r| {
            r.get("severity")
                .and_then(|v| v.as_int())
                .unwrap_or(SEVERITY_FAILED)
                >= SEVERITY_FAILED
        })
        .map(|r| r.str_field("data").unwrap_or("").trim().to_string())
}

impl Depot for P4Client {
    fn changes(
        &mut self,
        path: &str,
        from_cl: Option<u64>,
        max: Option<usize>,
    ) -> Result<Vec<Changelist>, P4Error> {
        let mut args: Vec<String> = vec![
            "changes".into(),
            "-l".into(),
            "-s".into(),
            "submitted".into(),
            "-r".into(),
        ];
        if let Some(max) = max {
            args.push("-m".into());
            args.push(max.to_string());
        }
        // The path goes out encoded; "@>N" asks for strictly newer
        // changelists than the resume point.
        let path = p4fusion_core::paths::encode_depot_path(path);
        let path_spec = match from_cl {
            Some(from) => format!("{path}@>{from}"),
            None => path,
        };
        args.push(path_spec);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let records = self.run(&args)?;
        parse::changes(&records)
    }

    fn describe(&mut self, cl: u64) -> Result<Vec<FileEntry>, P4Error> {
        let cl = cl.to_string();
        let records = self.run(&["describe", "-s", &cl])?;
        parse::describe(&records)
    }

    fn filelog(&mut self, cl: u64) -> Result<Vec<FileEntry>, P4Error> {
        let cl = cl.to_string();
        // -m1: only the head entry per file; the per-CL restriction already
        // pins the revision of interest.
        let records = self.run(&["filelog", "-c", &cl, "-m1", "//..."])?;
        parse::filelog(&records)
    }

    fn print(&mut self, specs: &[String], sink: &mut dyn PrintSink) -> Result<(), P4Error> {
        if specs.is_empty() {
            return Ok(());
        }
        let mut args: Vec<&str> = vec!["print"];
        args.extend(specs.iter().map(String::as_str));
        self.run_print(&args, sink)
    }

    fn users(&mut self) -> Result<HashMap<String, User>, P4Error> {
        let records = self.run(&["users", "-a"])?;
        Ok(parse::users(&records))
    }

    fn info(&mut self) -> Result<ServerInfo, P4Error> {
        let records = self.run(&["info"])?;
        parse::info(&records)
    }

    fn client_view(&mut self) -> Result<ClientSpec, P4Error> {
        let records = self.run(&["client", "-o"])?;
        parse::client(&records)
    }

    fn labels(&mut self) -> Result<Vec<LabelSummary>, P4Error> {
        let records = self.run(&["labels"])?;
        Ok(parse::labels(&records))
    }

    fn label(&mut self, name: &str) -> Result<LabelSpec, P4Error> {
        let records = self.run(&["label", "-o", name])?;
        parse::label(&records)
    }
}
