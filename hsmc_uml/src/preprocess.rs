//! Rewrites annotated diagram source into renderer-safe text.
//!
//! The annotated dialect carries syntax a plain state-diagram renderer
//! rejects: `entry:`/`exit:` action lines, internal-transition lines,
//! guard/action suffixes on transitions, history markers, and the
//! `@meta` configuration block. [`preprocess`] strips or rewrites all of
//! these in a single forward scan and returns what it removed as a
//! [`DiagramMeta`] side channel, so the preview path never sees the raw
//! annotations and round-tripping tools never lose them.
//!
//! The scan is deliberately forgiving: a line it does not recognize is
//! passed through unchanged, and the function has no failure mode. Every
//! call starts from fresh scratch state, so repeated invocations are
//! independent.

use log::trace;
use serde::Serialize;
use std::collections::BTreeMap;

/// Whether a history marker restores only the direct child or the full
/// nested configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HistoryKind {
    /// `[H]`: restores the last active direct child.
    Shallow,
    /// `[H*]`: restores the last active nested configuration.
    Deep,
}

/// A history marker replaced by a synthetic state name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryState {
    /// Dotted path of the composite the marker appeared in; empty at top
    /// level.
    pub scope: String,
    /// Synthetic, uniquely numbered name substituted into the diagram.
    pub name: String,
    /// Shallow or deep.
    pub kind: HistoryKind,
}

/// Everything the preprocessor strips from the renderable view.
///
/// Maps are keyed by the dotted path of the owning state and serialize in
/// a stable order, so the side channel is byte-identical across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagramMeta {
    /// Entry actions per state, in declaration order.
    pub entry_actions: BTreeMap<String, Vec<String>>,
    /// Exit actions per state, in declaration order.
    pub exit_actions: BTreeMap<String, Vec<String>>,
    /// Internal-transition lines per state, verbatim.
    pub internal_transitions: BTreeMap<String, Vec<String>>,
    /// History markers, in order of appearance.
    pub history_states: Vec<HistoryState>,
}

/// Rewrites `source` into a renderer-compatible diagram plus metadata.
pub fn preprocess(source: &str) -> (String, DiagramMeta) {
    let mut meta = DiagramMeta::default();
    let mut out = String::with_capacity(source.len());
    let mut scopes: Vec<String> = Vec::new();
    let mut history_counter = 0usize;
    let mut in_meta = false;

    for line in source.lines() {
        let trimmed = line.trim();
        let indent = &line[..line.len() - line.trim_start().len()];

        if in_meta {
            if trimmed == "@endmeta" {
                in_meta = false;
            }
            continue;
        }
        if trimmed == "@meta" || trimmed.starts_with("@meta ") {
            in_meta = true;
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("state ") {
            if let Some(name) = rest.strip_suffix('{').map(str::trim) {
                scopes.push(name.to_string());
            }
            out.push_str(line);
            out.push('\n');
            continue;
        }
        if trimmed == "}" {
            scopes.pop();
            out.push_str(line);
            out.push('\n');
            continue;
        }

        let scope = scopes.join(".");
        if let Some(action) = trimmed.strip_prefix("entry:") {
            if !scopes.is_empty() {
                meta.entry_actions
                    .entry(scope)
                    .or_default()
                    .push(action.trim().to_string());
                out.push_str(indent);
                out.push_str("' entry action");
                out.push('\n');
                continue;
            }
        }
        if let Some(action) = trimmed.strip_prefix("exit:") {
            if !scopes.is_empty() {
                meta.exit_actions
                    .entry(scope)
                    .or_default()
                    .push(action.trim().to_string());
                out.push_str(indent);
                out.push_str("' exit action");
                out.push('\n');
                continue;
            }
        }
        if trimmed.starts_with(':') && !trimmed.contains("-->") && !scopes.is_empty() {
            meta.internal_transitions
                .entry(scope)
                .or_default()
                .push(trimmed[1..].trim().to_string());
            out.push_str(indent);
            out.push_str("' internal transition");
            out.push('\n');
            continue;
        }

        let mut rewritten = trimmed.to_string();
        for (marker, kind) in [("[H*]", HistoryKind::Deep), ("[H]", HistoryKind::Shallow)] {
            while let Some(at) = rewritten.find(marker) {
                history_counter += 1;
                let name = format!("history_{history_counter}");
                meta.history_states.push(HistoryState {
                    scope: scope.clone(),
                    name: name.clone(),
                    kind,
                });
                rewritten.replace_range(at..at + marker.len(), &name);
            }
        }

        if rewritten.contains("-->") {
            if let Some((arrow, label)) = rewritten.split_once(':') {
                // Guards and actions clutter the rendering; keep the event
                // and a short marker in their place.
                let has_suffix = label.contains('/') || label.contains('[');
                if has_suffix {
                    let event = label
                        .split(['/', '['])
                        .next()
                        .unwrap_or_default()
                        .trim();
                    rewritten = format!("{} : {event} ...", arrow.trim_end());
                }
            }
            out.push_str(indent);
            out.push_str(&rewritten);
            out.push('\n');
            continue;
        }

        if rewritten != trimmed {
            out.push_str(indent);
            out.push_str(&rewritten);
            out.push('\n');
            continue;
        }

        trace!("passing line through unchanged: `{trimmed}`");
        out.push_str(line);
        out.push('\n');
    }
    (out, meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_and_exit_become_comments() {
        let source = "state On {\n  entry: BSP_ledOn();\n  exit: BSP_ledOff();\n}\n";
        let (diagram, meta) = preprocess(source);
        assert!(!diagram.contains("entry:"));
        assert!(!diagram.contains("exit:"));
        assert!(diagram.contains("' entry action"));
        assert_eq!(meta.entry_actions["On"], vec!["BSP_ledOn();"]);
        assert_eq!(meta.exit_actions["On"], vec!["BSP_ledOff();"]);
    }

    #[test]
    fn nested_scope_keys_are_dotted() {
        let source = "state On {\n state Dim {\n  entry: dim();\n }\n}\n";
        let (_, meta) = preprocess(source);
        assert_eq!(meta.entry_actions["On.Dim"], vec!["dim();"]);
    }

    #[test]
    fn internal_transitions_are_recorded() {
        let source = "state Off {\n  : POLL / BSP_sample()\n}\n";
        let (diagram, meta) = preprocess(source);
        assert!(diagram.contains("' internal transition"));
        assert_eq!(meta.internal_transitions["Off"], vec!["POLL / BSP_sample()"]);
    }

    #[test]
    fn guard_and_action_suffixes_are_folded() {
        let source = "Off --> On : TIMEOUT / BSP_ledOn() [count > 3]\n";
        let (diagram, _) = preprocess(source);
        assert_eq!(diagram, "Off --> On : TIMEOUT ...\n");
    }

    #[test]
    fn plain_transitions_are_untouched() {
        let source = "Off --> On : TIMEOUT\n";
        let (diagram, _) = preprocess(source);
        assert_eq!(diagram, source);
    }

    #[test]
    fn history_markers_get_synthetic_names() {
        let source = "state On {\n  Resume --> [H*]\n}\nOff --> [H]\n";
        let (diagram, meta) = preprocess(source);
        assert!(diagram.contains("Resume --> history_1"));
        assert!(diagram.contains("Off --> history_2"));
        assert_eq!(
            meta.history_states,
            vec![
                HistoryState {
                    scope: "On".to_string(),
                    name: "history_1".to_string(),
                    kind: HistoryKind::Deep,
                },
                HistoryState {
                    scope: String::new(),
                    name: "history_2".to_string(),
                    kind: HistoryKind::Shallow,
                },
            ]
        );
    }

    #[test]
    fn meta_block_is_stripped() {
        let source = "@startuml\n@meta\n{ \"name\": \"Blinky\" }\n@endmeta\n[*] --> Off\n@enduml\n";
        let (diagram, _) = preprocess(source);
        assert!(!diagram.contains("@meta"));
        assert!(!diagram.contains("Blinky"));
        assert!(diagram.contains("[*] --> Off"));
        assert!(diagram.contains("@startuml"));
    }

    #[test]
    fn unrecognized_lines_pass_through() {
        let source = "skinparam monochrome true\nsome nonsense line\n";
        let (diagram, meta) = preprocess(source);
        assert_eq!(diagram, source);
        assert_eq!(meta, DiagramMeta::default());
    }

    #[test]
    fn calls_are_independent() {
        let source = "state On {\n  Resume --> [H]\n}\n";
        let first = preprocess(source);
        let second = preprocess(source);
        assert_eq!(first, second);
        // Numbering restarts on every call.
        assert_eq!(second.1.history_states[0].name, "history_1");
    }
}
