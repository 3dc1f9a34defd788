use flux_core::types::Runtime;

/// First-line markers that select the Node runtime. Matched case-insensitively.
const NODE_MARKERS: [&str; 3] = ["// runtime: node", "#!nodejs", "// language: javascript"];

/// Classify a script by its first line. Anything unmarked runs under Python.
pub fn detect(source: &str) -> Runtime {
    let first_line = source.lines().next().unwrap_or_default().to_lowercase();
    if NODE_MARKERS.iter().any(|m| first_line.contains(m)) {
        Runtime::Node
    } else {
        Runtime::Python
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_select_node() {
        assert_eq!(detect("// runtime: node\nconsole.log(1)"), Runtime::Node);
        assert_eq!(detect("#!nodejs\n"), Runtime::Node);
        assert_eq!(detect("  // Language: JavaScript"), Runtime::Node);
        assert_eq!(detect("// RUNTIME: NODE"), Runtime::Node);
    }

    #[test]
    fn only_first_line_counts() {
        assert_eq!(detect("print('x')\n// runtime: node"), Runtime::Python);
    }

    #[test]
    fn unmarked_and_empty_default_to_python() {
        assert_eq!(detect(""), Runtime::Python);
        assert_eq!(detect("\n// runtime: node"), Runtime::Python);
        assert_eq!(detect("import os"), Runtime::Python);
        assert_eq!(detect("// runtime: deno"), Runtime::Python);
    }
}
