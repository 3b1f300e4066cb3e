//! Extraction of code and dependency blocks from raw generator text.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::types::CodeArtifact;

static CODE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```code\s*(.*?)```").expect("code block pattern is valid")
});

static DEPENDENCY_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```dependencies\s*(.*?)```").expect("dependency block pattern is valid")
});

/// Result of parsing one generator response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedResponse {
    pub success: bool,
    pub code: String,
    pub dependencies: Vec<String>,
    pub error: String,
}

impl ParsedResponse {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            code: String::new(),
            dependencies: Vec::new(),
            error: error.into(),
        }
    }

    /// Convert a successful parse into an artifact; `None` on failure.
    pub fn into_artifact(self) -> Option<CodeArtifact> {
        self.success
            .then(|| CodeArtifact::new(self.code, self.dependencies))
    }
}

/// Locate the first ```` ```code ```` block and every ```` ```dependencies ```` block.
///
/// Dependency lines are trimmed, blank lines dropped, and blocks concatenated
/// in order of appearance. Duplicates are kept.
pub fn parse_response(text: &str) -> ParsedResponse {
    let Some(code) = CODE_BLOCK_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
    else {
        return ParsedResponse::failure("Code block not found");
    };

    let dependencies = DEPENDENCY_BLOCK_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .flat_map(|block| block.as_str().lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    ParsedResponse {
        success: true,
        code,
        dependencies,
        error: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "Here you go:\n\n```code\nimport numpy as np\nprint(np.arange(3))\n```\n\n```dependencies\nnumpy==1.24.3\n\n  pandas>=1.5  \n```\n";

    #[test]
    fn extracts_code_and_dependencies() {
        let parsed = parse_response(RESPONSE);
        assert!(parsed.success);
        assert_eq!(parsed.code, "import numpy as np\nprint(np.arange(3))");
        assert_eq!(parsed.dependencies, vec!["numpy==1.24.3", "pandas>=1.5"]);
        assert!(parsed.error.is_empty());
    }

    #[test]
    fn parsing_is_idempotent() {
        assert_eq!(parse_response(RESPONSE), parse_response(RESPONSE));
    }

    #[test]
    fn missing_code_block_reports_error() {
        let parsed = parse_response("```python\nprint(1)\n```");
        assert_eq!(
            parsed,
            ParsedResponse {
                success: false,
                code: String::new(),
                dependencies: Vec::new(),
                error: "Code block not found".to_string(),
            }
        );
        assert!(parsed.into_artifact().is_none());
    }

    #[test]
    fn empty_input_reports_error() {
        let parsed = parse_response("");
        assert!(!parsed.success);
        assert_eq!(parsed.error, "Code block not found");
    }

    #[test]
    fn multiple_dependency_blocks_concatenate_without_dedup() {
        let text = "```dependencies\nrequests\n```\n```code\nprint(1)\n```\n```dependencies\nrequests\nflask\n```";
        let parsed = parse_response(text);
        assert_eq!(parsed.dependencies, vec!["requests", "requests", "flask"]);
    }

    #[test]
    fn only_first_code_block_is_used() {
        let text = "```code\nprint('first')\n```\n```code\nprint('second')\n```";
        let artifact = parse_response(text).into_artifact().expect("artifact");
        assert_eq!(artifact.source(), "print('first')");
        assert!(artifact.dependencies().is_empty());
    }
}
