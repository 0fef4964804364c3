use std::io::{self, Write};
use std::time::Instant;

use serde::Serialize;

use crate::app::{
    AliasResult, DownloadResult, InfoResult, ProgressEvent, ProgressSink, SearchResult,
    SelectResult,
};
use crate::biosample::BiosampleRecord;
use crate::selection::SelectionResult;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_select(result: &SelectResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_search(result: &SearchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_biosample(result: &BiosampleRecord) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_alias(result: &AliasResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable renderer: progress lines on stderr, summaries on stdout.
pub struct ConsoleOutput {
    started: Instant,
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleOutput {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn print_select(&self, result: &SelectResult) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{CYAN}kira-dcc selection summary{RESET}")?;
        for item in &result.items {
            let color = match item.status.as_str() {
                "ok" => GREEN,
                "ambiguous" => YELLOW,
                _ => RED,
            };
            writeln!(
                out,
                "{color}{} {} [{}] {}{RESET}",
                item.accession, item.role, item.assembly, item.action
            )?;
            if let Some(path) = &item.path {
                writeln!(out, "{color}   {path}{RESET}")?;
            }
            if let Some(SelectionResult::Ambiguous { reason, candidates }) = &item.selection {
                writeln!(out, "{color}   {reason:?}: {}{RESET}", candidates.join(", "))?;
            }
            if let Some(error) = &item.error {
                writeln!(out, "{RED}   {error}{RESET}")?;
            }
        }
        self.footer(&mut out, result.items.len(), result.failed())
    }

    pub fn print_download(&self, result: &DownloadResult) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{CYAN}kira-dcc download summary{RESET}")?;
        for item in &result.items {
            let color = if item.status == "ok" { GREEN } else { RED };
            writeln!(out, "{color}{} ({} files){RESET}", item.accession, item.files.len())?;
            for file in &item.files {
                writeln!(out, "   {} {} {}", file.action, file.file_id, file.path)?;
            }
            if let Some(error) = &item.error {
                writeln!(out, "{RED}   {error}{RESET}")?;
            }
        }
        self.footer(&mut out, result.items.len(), result.failed())
    }

    pub fn print_info(&self, result: &InfoResult) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{CYAN}{}{RESET} {}", result.accession, result.description)?;
        writeln!(out, "assay:     {}", result.assay_term_name)?;
        writeln!(out, "target:    {} {}", result.target, result.label)?;
        writeln!(
            out,
            "biosample: {} ({})",
            result.biosample_term_name, result.biosample_type
        )?;
        writeln!(out, "lab:       {}", result.lab)?;
        writeln!(out, "status:    {}", result.status)?;
        writeln!(out, "metadata:  {}", result.metadata_path)?;
        for file in &result.files {
            let local = if file.local { "*" } else { " " };
            writeln!(
                out,
                "{local} {:<12} {:<8} {:<16} {:<32} rep={}{}",
                file.file_id,
                file.assembly.as_deref().unwrap_or("-"),
                file.file_type.as_deref().unwrap_or("-"),
                file.output_type.as_deref().unwrap_or("-"),
                file.bio_rep.as_deref().unwrap_or("-"),
                if file.is_pooled { " pooled" } else { "" },
            )?;
        }
        Ok(())
    }

    pub fn print_search(&self, result: &SearchResult) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for accession in &result.accessions {
            writeln!(out, "{accession}")?;
        }
        writeln!(out, "{CYAN}{} experiments{RESET}", result.count)
    }

    pub fn print_biosample(&self, result: &BiosampleRecord) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{CYAN}{}{RESET} {}", result.accession, result.term_name)?;
        writeln!(out, "term:      {}", result.term_id)?;
        writeln!(out, "type:      {}", result.biosample_type)?;
        writeln!(out, "organism:  {}", result.organism.as_deref().unwrap_or("-"))
    }

    pub fn print_alias(&self, result: &AliasResult) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(
            out,
            "{CYAN}{}{RESET} -> {} {}",
            result.alias,
            result.accession.as_deref().unwrap_or("-"),
            result.id.as_deref().unwrap_or("")
        )?;
        if let Some(kind) = result.types.first() {
            writeln!(out, "type:      {kind}")?;
        }
        Ok(())
    }

    fn footer(&self, out: &mut impl Write, total: usize, failed: usize) -> io::Result<()> {
        writeln!(
            out,
            "{GREEN}done: {}{RESET}  {YELLOW}errors: {failed}{RESET}  ({:.1}s)",
            total - failed,
            self.started.elapsed().as_secs_f64()
        )
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        let mut err = io::stderr().lock();
        let _ = match event.elapsed {
            Some(elapsed) => writeln!(err, "{} ({} ms)", event.message, elapsed.as_millis()),
            None => writeln!(err, "{}", event.message),
        };
    }
}
