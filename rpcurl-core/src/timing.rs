//! # Phase Timing
//!
//! A tree of named phase durations printed in very verbose mode.
//!
//! [`Timing`] is selected once at startup. Every call site uses the same methods whether
//! timing is enabled or not; on [`Timing::Disabled`] they do nothing.
use std::fmt::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One named phase of the tree.
#[derive(Debug)]
pub struct TimingNode {
    title: String,
    start: Instant,
    duration: Option<Duration>,
    children: Vec<Arc<Mutex<TimingNode>>>,
}

/// A handle on one node of the timing tree, or nothing at all.
#[derive(Debug, Clone, Default)]
pub enum Timing {
    #[default]
    Disabled,
    Enabled(Arc<Mutex<TimingNode>>),
}

impl Timing {
    /// Starts a new root node.
    pub fn root(title: &str) -> Self {
        Timing::Enabled(Arc::new(Mutex::new(TimingNode {
            title: title.to_string(),
            start: Instant::now(),
            duration: None,
            children: Vec::new(),
        })))
    }

    /// Starts a child phase. On a disabled handle this returns another disabled handle.
    pub fn child(&self, title: &str) -> Timing {
        let Timing::Enabled(node) = self else {
            return Timing::Disabled;
        };

        let child = Arc::new(Mutex::new(TimingNode {
            title: title.to_string(),
            start: Instant::now(),
            duration: None,
            children: Vec::new(),
        }));

        if let Ok(mut node) = node.lock() {
            node.children.push(child.clone());
        }

        Timing::Enabled(child)
    }

    /// Marks the phase as complete. Only the first call records a duration.
    pub fn done(&self) {
        if let Timing::Enabled(node) = self
            && let Ok(mut node) = node.lock()
            && node.duration.is_none()
        {
            node.duration = Some(node.start.elapsed());
        }
    }

    /// Renders the tree as indented `title: duration` lines.
    pub fn render(&self) -> Option<String> {
        let Timing::Enabled(node) = self else {
            return None;
        };

        let mut out = String::new();
        render_node(node, 0, &mut out);
        Some(out)
    }
}

fn render_node(node: &Arc<Mutex<TimingNode>>, level: usize, out: &mut String) {
    let Ok(node) = node.lock() else {
        return;
    };

    let _ = writeln!(
        out,
        "{}{}: {:?}",
        "  ".repeat(level),
        node.title,
        node.duration.unwrap_or_default()
    );

    for child in &node.children {
        render_node(child, level + 1, out);
    }
}
