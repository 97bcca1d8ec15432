// src/timing.rs

//! Pass timing for `--time`.
//!
//! A [`TimerSession`] collects named passes with monotonic durations. The
//! worker opens a session when timing is requested, the graph builder and
//! driver record their passes into it, and the session renders as an aligned
//! table once the build finishes.

use std::time::{Duration, Instant};

/// One completed, named pass.
#[derive(Debug, Clone)]
pub struct TimedPass {
    pub name: String,
    pub elapsed: Duration,
}

/// A collection of timed passes for one build.
#[derive(Debug, Clone)]
pub struct TimerSession {
    name: String,
    passes: Vec<TimedPass>,
    current: Option<(String, Instant)>,
}

impl TimerSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passes: Vec::new(),
            current: None,
        }
    }

    /// Begin a pass. An unfinished previous pass is closed first.
    pub fn pass_go(&mut self, pass: impl Into<String>) {
        self.pass_end();
        self.current = Some((pass.into(), Instant::now()));
    }

    /// Close the currently running pass, if any.
    pub fn pass_end(&mut self) {
        if let Some((name, started)) = self.current.take() {
            self.passes.push(TimedPass {
                name,
                elapsed: started.elapsed(),
            });
        }
    }

    /// Record an externally measured pass.
    pub fn record(&mut self, name: impl Into<String>, elapsed: Duration) {
        self.passes.push(TimedPass {
            name: name.into(),
            elapsed,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty() && self.current.is_none()
    }

    /// Render the session as an aligned two-column table.
    pub fn render(&self) -> String {
        let width = self
            .passes
            .iter()
            .map(|p| p.name.len())
            .max()
            .unwrap_or(0)
            .max(self.name.len());

        let mut out = String::new();
        out.push_str(&format!("{:<width$}  time\n", self.name, width = width));

        let mut total = Duration::ZERO;
        for pass in &self.passes {
            total += pass.elapsed;
            out.push_str(&format!(
                "{:<width$}  {}\n",
                pass.name,
                format_duration(pass.elapsed),
                width = width
            ));
        }

        out.push_str(&format!(
            "{:<width$}  {}",
            "total",
            format_duration(total),
            width = width
        ));
        out
    }
}

fn format_duration(d: Duration) -> String {
    let ms = d.as_secs_f64() * 1000.0;
    if ms >= 1000.0 {
        format!("{:.3} s", ms / 1000.0)
    } else {
        format!("{ms:.3} ms")
    }
}
