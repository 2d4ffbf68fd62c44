use anyhow::{Context, Result};
use std::env;
use std::io::Write;
use std::sync::Mutex;

use crate::lower::{BuildNode, Output};
use crate::syntax::Recipe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the lowered build graph: one stable record per node.
    pub fn format_graph(&self, nodes: &[std::sync::Arc<BuildNode>]) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let records: Vec<&BuildNode> = nodes.iter().map(|n| n.as_ref()).collect();
                serde_json::to_string_pretty(&records)
                    .context("Failed to serialize build graph to JSON")
            }
            OutputFormat::Human => Ok(self.format_graph_human(nodes)),
        }
    }

    pub fn format_recipe(&self, recipe: &Recipe) -> Result<String> {
        serde_json::to_string_pretty(recipe).context("Failed to serialize recipe AST to JSON")
    }

    fn format_graph_human(&self, nodes: &[std::sync::Arc<BuildNode>]) -> String {
        let mut out = String::new();
        for node in nodes {
            out.push_str(&format!("{}  ({})\n", node.id, &node.fingerprint_hex[..12]));
            if !node.deps.is_empty() {
                out.push_str(&format!("  deps: {}\n", node.deps.join(", ")));
            }
            for effect in &node.effects {
                out.push_str(&format!(
                    "  {:<14} {}\n",
                    effect.opcode,
                    effect.args.join(" ")
                ));
            }
            for effect in &node.push_effects {
                out.push_str(&format!(
                    "  {:<14} {} [push]\n",
                    effect.opcode,
                    effect.args.join(" ")
                ));
            }
            for output in &node.outputs {
                match output {
                    Output::Artifact { path } => {
                        out.push_str(&format!("  artifact: {}\n", path));
                    }
                    Output::Image { tag } => {
                        out.push_str(&format!("  image: {}\n", tag));
                    }
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Serializes diagnostic lines through one sink so concurrent lowerings
/// cannot interleave partial lines. Color is gated on `FORCE_COLOR` /
/// `NO_COLOR` and only applies to the severity marker.
pub struct DiagnosticSink {
    inner: Mutex<Box<dyn Write + Send>>,
    color: bool,
}

impl DiagnosticSink {
    pub fn stderr() -> Self {
        Self {
            inner: Mutex::new(Box::new(std::io::stderr())),
            color: color_enabled(),
        }
    }

    #[cfg(test)]
    fn sink(writer: Box<dyn Write + Send>, color: bool) -> Self {
        Self {
            inner: Mutex::new(writer),
            color,
        }
    }

    /// Writes one `path:line:column: kind: message` line atomically.
    pub fn emit(&self, line: &str) {
        let mut w = self.inner.lock().unwrap();
        let rendered = if self.color {
            format!("\x1b[31m{}\x1b[0m\n", line)
        } else {
            format!("{}\n", line)
        };
        let _ = w.write_all(rendered.as_bytes());
        let _ = w.flush();
    }

    pub fn emit_all<'a>(&self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            self.emit(line);
        }
    }
}

/// `NO_COLOR` wins over `FORCE_COLOR`; both affect diagnostic rendering
/// only.
fn color_enabled() -> bool {
    if env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::{CacheClass, Effect};
    use std::sync::Arc;

    fn sample_node() -> Arc<BuildNode> {
        Arc::new(BuildNode {
            id: "+build".to_string(),
            fingerprint_hex: "abcdef0123456789".to_string(),
            deps: vec!["+base".to_string()],
            effects: vec![Effect {
                opcode: "RUN".to_string(),
                args: vec!["make".to_string()],
                cache_class: CacheClass::FilesystemWrite,
            }],
            push_effects: vec![],
            outputs: vec![Output::Image {
                tag: "img:latest".to_string(),
            }],
        })
    }

    #[test]
    fn json_graph_is_valid() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let out = formatter.format_graph(&[sample_node()]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["id"], "+build");
        assert_eq!(parsed[0]["deps"][0], "+base");
    }

    #[test]
    fn human_graph_lists_effects_and_outputs() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let out = formatter.format_graph(&[sample_node()]).unwrap();
        assert!(out.contains("+build"));
        assert!(out.contains("deps: +base"));
        assert!(out.contains("image: img:latest"));
    }

    #[test]
    fn sink_writes_full_lines() {
        use std::sync::{Arc as StdArc, Mutex as StdMutex};

        #[derive(Clone)]
        struct Shared(StdArc<StdMutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buffer = Shared(StdArc::new(StdMutex::new(Vec::new())));
        let sink = DiagnosticSink::sink(Box::new(buffer.clone()), false);
        sink.emit("Kilnfile:2:5: UnknownFlag: unknown flag --bogus for RUN");
        let written = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            written,
            "Kilnfile:2:5: UnknownFlag: unknown flag --bogus for RUN\n"
        );
    }
}
