//! A conversion session against one installed `gpsbabel`.
//!
//! [`GpsBabel`] accumulates global flags, an [`ActionChain`] and an optional
//! stdin buffer, then runs the converter once per [`GpsBabel::execute`] or
//! [`GpsBabel::spawn`]. With auto-clear on, the session is reset as soon as a
//! run starts, whether or not that run later succeeds.

use std::collections::BTreeMap;
use std::mem;

use tracing::{debug, info};

use crate::capabilities::{Capabilities, VersionInfo, parse_version};
use crate::chain::{ActionChain, ActionKind, ActionOptions};
use crate::command::{GlobalFlags, build_command};
use crate::error::{Error, Result};
use crate::gpx_types::{GpxDocument, Waypoint};
use crate::options::BabelConfig;
use crate::parser::parse_gpx;
use crate::process::{self, BackgroundProcess, ProcessOutput, ProcessStatus};

/// Path gpsbabel reads as stdin and writes as stdout.
const STDIO_PATH: &str = "-";
const STDIO_FORMAT: &str = "gpx";

/// What a successful run produced on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutput {
    Lines(Vec<String>),
    Document(GpxDocument),
}

impl RunOutput {
    pub fn into_document(self) -> Option<GpxDocument> {
        match self {
            Self::Document(doc) => Some(doc),
            Self::Lines(_) => None,
        }
    }

    pub fn lines(&self) -> Option<&[String]> {
        match self {
            Self::Lines(lines) => Some(lines),
            Self::Document(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub exit_code: Option<i32>,
    pub output: RunOutput,
}

/// Classify a finished child and shape its stdout.
fn complete(output: ProcessOutput, parse_output: bool) -> Result<RunResult> {
    let output = output.check()?;
    let stdout = output.stdout_text();
    let result = if parse_output {
        RunOutput::Document(parse_gpx(&stdout)?)
    } else {
        RunOutput::Lines(stdout.lines().map(str::to_string).collect())
    };
    Ok(RunResult {
        exit_code: output.exit_code,
        output: result,
    })
}

/// Run a discovery command; some builds print listings on stderr, so both
/// streams are kept and neither is treated as a failure.
fn discovery_text(args: &[String]) -> Result<String> {
    let output = process::run(args, b"")?;
    let mut text = output.stdout_text();
    text.push_str(&output.stderr_text());
    Ok(text)
}

/// A run started with [`GpsBabel::spawn`].
///
/// The command line and stdin were fixed when it started, so later edits to
/// the session do not affect it.
#[derive(Debug)]
pub struct PendingRun {
    process: BackgroundProcess,
    parse_output: bool,
}

impl PendingRun {
    pub fn id(&self) -> u32 {
        self.process.id()
    }

    /// Non-blocking exit check.
    pub fn poll(&mut self) -> Result<ProcessStatus> {
        self.process.poll()
    }

    /// Stdout collected by the last [`poll`](Self::poll).
    pub fn partial_output(&self) -> &[u8] {
        self.process.stdout()
    }

    /// Wait for exit, then classify and parse exactly like [`GpsBabel::execute`].
    pub fn finish(self) -> Result<RunResult> {
        complete(self.process.finish()?, self.parse_output)
    }
}

#[derive(Debug, Clone)]
pub struct GpsBabel {
    config: BabelConfig,
    capabilities: Capabilities,
    version: Option<VersionInfo>,
    flags: GlobalFlags,
    chain: ActionChain,
    stdin: Vec<u8>,
    auto_clear: bool,
}

impl GpsBabel {
    /// Session over capability tables supplied by the caller.
    pub fn new(config: BabelConfig, capabilities: Capabilities) -> Self {
        let auto_clear = config.auto_clear;
        Self {
            config,
            capabilities,
            version: None,
            flags: GlobalFlags::default(),
            chain: ActionChain::new(),
            stdin: Vec::new(),
            auto_clear,
        }
    }

    /// Probe the configured executable with `-V`, `-h` and `-l`.
    ///
    /// Fails with [`Error::UnsupportedVersion`] when the banner is not in
    /// [`BabelConfig::supported_versions`].
    pub fn discover(config: BabelConfig) -> Result<Self> {
        let exe = config.executable.clone();
        let version = parse_version(&discovery_text(&[exe.clone(), "-V".to_string()])?);
        if !config.accepts_version(&version.banner) {
            return Err(Error::UnsupportedVersion(version.banner));
        }
        info!(banner = %version.banner, "found gpsbabel");

        let help = discovery_text(&[exe.clone(), "-h".to_string()])?;
        let charsets = discovery_text(&[exe, "-l".to_string()])?;
        let capabilities = Capabilities::from_help_output(&help, &charsets);
        debug!(
            formats = capabilities.formats.len(),
            filters = capabilities.filters.len(),
            charsets = capabilities.charsets.len(),
            "loaded capability tables"
        );

        let mut babel = Self::new(config, capabilities);
        babel.version = Some(version);
        Ok(babel)
    }

    pub fn config(&self) -> &BabelConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Banner found by [`discover`](Self::discover).
    pub fn version(&self) -> Option<&VersionInfo> {
        self.version.as_ref()
    }

    pub fn flags(&self) -> &GlobalFlags {
        &self.flags
    }

    pub fn flags_mut(&mut self) -> &mut GlobalFlags {
        &mut self.flags
    }

    pub fn chain(&self) -> &ActionChain {
        &self.chain
    }

    pub fn stdin_data(&self) -> &[u8] {
        &self.stdin
    }

    pub fn auto_clear(&self) -> bool {
        self.auto_clear
    }

    pub fn set_auto_clear(&mut self, auto_clear: bool) {
        self.auto_clear = auto_clear;
    }

    pub fn add_action(
        &mut self,
        kind: &str,
        name: &str,
        path: Option<&str>,
        options: ActionOptions,
    ) -> Result<()> {
        self.chain
            .add_action(&self.capabilities, kind, name, path, options)
    }

    /// Read `path` as `format`; `None` uses the configured default charset.
    pub fn add_input_file(&mut self, path: &str, format: &str, charset: Option<&str>) -> Result<()> {
        self.add_file(ActionKind::InputFile, path, format, charset, ActionOptions::new())
    }

    pub fn add_output_file(&mut self, path: &str, format: &str, charset: Option<&str>) -> Result<()> {
        self.add_file(ActionKind::OutputFile, path, format, charset, ActionOptions::new())
    }

    /// Add every entry of `files` (path to format and charset), or none of them.
    pub fn add_input_files(&mut self, files: &BTreeMap<String, (String, Option<String>)>) -> Result<()> {
        self.chain.add_files(
            &self.capabilities,
            ActionKind::InputFile,
            files,
            &self.config.default_charset,
        )
    }

    pub fn add_output_files(&mut self, files: &BTreeMap<String, (String, Option<String>)>) -> Result<()> {
        self.chain.add_files(
            &self.capabilities,
            ActionKind::OutputFile,
            files,
            &self.config.default_charset,
        )
    }

    fn add_file(
        &mut self,
        kind: ActionKind,
        path: &str,
        format: &str,
        charset: Option<&str>,
        options: ActionOptions,
    ) -> Result<()> {
        let charset = charset.unwrap_or(&self.config.default_charset);
        self.chain
            .add_file(&self.capabilities, kind, path, format, charset, options)
    }

    /// Feed `text` to the converter as GPX on stdin.
    pub fn set_input_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.add_input_file(STDIO_PATH, STDIO_FORMAT, None)?;
        self.stdin = text.into().into_bytes();
        Ok(())
    }

    pub fn set_input_gpx(&mut self, doc: &GpxDocument) -> Result<()> {
        let xml = doc.to_xml_with_creator(&self.config.creator);
        self.set_input_text(xml)
    }

    /// Have the converter write GPX to stdout.
    pub fn capture_stdout(&mut self) -> Result<()> {
        self.add_output_file(STDIO_PATH, STDIO_FORMAT, None)
    }

    /// Reset flags, chain and stdin buffer. The auto-clear setting is kept.
    pub fn clear(&mut self) {
        self.flags = GlobalFlags::default();
        self.chain.clear();
        self.stdin.clear();
    }

    pub fn build_command(&self, debug: bool) -> Vec<String> {
        let debug_level = debug.then_some(self.config.debug_level);
        build_command(&self.config.executable, &self.flags, &self.chain, debug_level)
    }

    /// Stdin for the next run, clearing the session if configured.
    fn take_input(&mut self) -> Vec<u8> {
        if self.auto_clear {
            let input = mem::take(&mut self.stdin);
            self.clear();
            input
        } else {
            self.stdin.clone()
        }
    }

    /// Fix the argument vector and stdin for a run.
    fn start_run(&mut self, debug: bool) -> (Vec<String>, Vec<u8>) {
        let args = self.build_command(debug);
        (args, self.take_input())
    }

    /// Run the accumulated chain to completion.
    ///
    /// Anything on stderr fails the run with [`Error::ProcessFailure`]. With
    /// `parse_output` the stdout is parsed as GPX, otherwise it is returned as
    /// lines.
    pub fn execute(&mut self, parse_output: bool, debug: bool) -> Result<RunResult> {
        let (args, input) = self.start_run(debug);
        complete(process::run(&args, &input)?, parse_output)
    }

    /// Start the accumulated chain without waiting for it.
    pub fn spawn(&mut self, parse_output: bool, debug: bool) -> Result<PendingRun> {
        let (args, input) = self.start_run(debug);
        let process = BackgroundProcess::spawn(&args, &input)?;
        Ok(PendingRun {
            process,
            parse_output,
        })
    }

    /// Run an arbitrary argument vector in place of the built command.
    ///
    /// The stdin buffer is still fed to the child and auto-clear still applies.
    pub fn exec_raw(&mut self, args: &[String], parse_output: bool) -> Result<RunResult> {
        let input = self.take_input();
        complete(process::run(args, &input)?, parse_output)
    }

    /// Validate file actions against a copy of the chain; on error the
    /// session is untouched.
    fn staged(&self, files: Vec<(ActionKind, &str, &str, ActionOptions)>) -> Result<ActionChain> {
        let mut chain = self.chain.clone();
        for (kind, path, format, options) in files {
            chain.add_file(
                &self.capabilities,
                kind,
                path,
                format,
                &self.config.default_charset,
                options,
            )?;
        }
        Ok(chain)
    }

    fn select(&mut self, waypoints: bool, routes: bool, tracks: bool) {
        self.flags.process_waypoints = waypoints;
        self.flags.process_routes = routes;
        self.flags.process_tracks = tracks;
    }

    /// Read `path` through the converter, capturing GPX on stdout.
    pub fn read(
        &mut self,
        path: &str,
        format: &str,
        waypoints: bool,
        routes: bool,
        tracks: bool,
        parse_output: bool,
    ) -> Result<RunOutput> {
        self.chain = self.staged(vec![
            (ActionKind::InputFile, path, format, ActionOptions::new()),
            (ActionKind::OutputFile, STDIO_PATH, STDIO_FORMAT, ActionOptions::new()),
        ])?;
        self.select(waypoints, routes, tracks);
        Ok(self.execute(parse_output, false)?.output)
    }

    /// Write the current input to `path`, usually the stdin document.
    pub fn write(
        &mut self,
        path: &str,
        format: &str,
        waypoints: bool,
        routes: bool,
        tracks: bool,
        parse_output: bool,
    ) -> Result<RunOutput> {
        self.chain = self.staged(vec![(ActionKind::OutputFile, path, format, ActionOptions::new())])?;
        self.select(waypoints, routes, tracks);
        Ok(self.execute(parse_output, false)?.output)
    }

    /// Ask a receiver on `port` for its current fix.
    pub fn current_position(&mut self, port: &str, gps_type: &str) -> Result<Option<Waypoint>> {
        let get_posn = ActionOptions::from([("get_posn".to_string(), None)]);
        self.chain = self.staged(vec![
            (ActionKind::InputFile, port, gps_type, get_posn),
            (ActionKind::OutputFile, STDIO_PATH, STDIO_FORMAT, ActionOptions::new()),
        ])?;
        let doc = self.execute(true, false)?.output.into_document().unwrap_or_default();
        Ok(doc.waypoints.into_iter().next())
    }
}
