use std::cell::Cell;

use anyhow::Result;

/// Annotation colors understood by the external profiler's timeline view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Green,
    Purple,
    Red,
    Blue,
    Yellow,
}

impl Color {
    pub fn label(self) -> &'static str {
        match self {
            Color::Green => "green",
            Color::Purple => "purple",
            Color::Red => "red",
            Color::Blue => "blue",
            Color::Yellow => "yellow",
        }
    }
}

/// Seam to the external system profiler. Regions are purely observational
/// and must never affect program semantics.
pub trait Profiler {
    /// Begin the capture window the external tool records.
    fn start_capture(&self) -> Result<()>;

    /// End the capture window.
    fn stop_capture(&self) -> Result<()>;

    fn region_begin(&self, name: &str, color: Color);

    fn region_end(&self, name: &str);
}

/// Open profiling region, closed on drop. Guards close in reverse order of
/// construction, so nesting is LIFO by construction.
pub struct Region<'p> {
    profiler: &'p dyn Profiler,
    name: String,
}

impl Drop for Region<'_> {
    fn drop(&mut self) {
        self.profiler.region_end(&self.name);
    }
}

/// Open a named, colored region on `profiler`.
pub fn region<'p>(profiler: &'p dyn Profiler, name: &str, color: Color) -> Region<'p> {
    profiler.region_begin(name, color);
    Region {
        profiler,
        name: name.to_owned(),
    }
}

/// Profiler for environments without a capture tool attached. Everything is
/// a no-op.
pub struct NullProfiler;

impl Profiler for NullProfiler {
    fn start_capture(&self) -> Result<()> {
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        Ok(())
    }

    fn region_begin(&self, _name: &str, _color: Color) {}

    fn region_end(&self, _name: &str) {}
}

/// Writes region events to stderr, indented by nesting depth. Useful for
/// eyeballing bracket structure without the external tool.
pub struct LogProfiler {
    depth: Cell<usize>,
}

impl LogProfiler {
    pub fn new() -> Self {
        Self {
            depth: Cell::new(0),
        }
    }
}

impl Default for LogProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Profiler for LogProfiler {
    fn start_capture(&self) -> Result<()> {
        eprintln!("trace: capture start");
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        eprintln!("trace: capture stop");
        Ok(())
    }

    fn region_begin(&self, name: &str, color: Color) {
        let depth = self.depth.get();
        eprintln!(
            "trace: {:indent$}> {name} [{}]",
            "",
            color.label(),
            indent = depth * 2
        );
        self.depth.set(depth + 1);
    }

    fn region_end(&self, name: &str) {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        eprintln!("trace: {:indent$}< {name}", "", indent = depth * 2);
    }
}

/// One capture window scoped to a single variant's measured loop.
///
/// `stop` consumes the session, so a stop without a matching start cannot
/// compile; a session dropped without `stop` (early return, error) still
/// closes its bracket. When `suppressed` is true an external wrapper already
/// brackets the whole run and start/stop never reach the profiler; the
/// variant's `profile_<name>` region is still emitted.
pub struct ProfilingSession<'p> {
    profiler: &'p dyn Profiler,
    region: Option<Region<'p>>,
    suppressed: bool,
    open: bool,
}

impl<'p> ProfilingSession<'p> {
    pub fn start(profiler: &'p dyn Profiler, name: &str, suppressed: bool) -> Result<Self> {
        if !suppressed {
            profiler.start_capture()?;
        }
        let window = region(profiler, &format!("profile_{name}"), Color::Yellow);
        Ok(Self {
            profiler,
            region: Some(window),
            suppressed,
            open: true,
        })
    }

    pub fn stop(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        drop(self.region.take());
        if !self.suppressed {
            self.profiler.stop_capture()?;
        }
        Ok(())
    }
}

impl Drop for ProfilingSession<'_> {
    fn drop(&mut self) {
        // Close the bracket on every exit path. Errors from the collaborator
        // cannot be surfaced from drop.
        let _ = self.close();
    }
}
