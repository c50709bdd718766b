//! Standard library
//!
//! Script-facing registration surface for graphs and timers.

pub mod graph;
pub mod timer;

pub use graph::GraphModule;

/// Represents a function exported from a std module.
#[derive(Debug, Clone)]
pub struct ModuleExport {
    /// Short name (e.g., "after")
    pub short_name: &'static str,
    /// Fully qualified name (e.g., "std.timer.after")
    pub qualified_name: &'static str,
    /// Function signature (e.g., "(delay_ms: Int, callback: Fn) -> Timer")
    pub signature: &'static str,
}

/// Get all exports from a std module.
///
/// Returns None if the module doesn't exist.
pub fn get_module_exports(module_path: &str) -> Option<Vec<ModuleExport>> {
    match module_path {
        // "std" 模块：返回所有子模块
        "std" => Some(vec![
            ModuleExport {
                short_name: "graph",
                qualified_name: "std.graph",
                signature: "Module",
            },
            ModuleExport {
                short_name: "timer",
                qualified_name: "std.timer",
                signature: "Module",
            },
        ]),
        "std.graph" => Some(graph::exports()),
        "std.timer" => Some(timer::exports()),
        _ => None,
    }
}

#[cfg(test)]
mod tests;
