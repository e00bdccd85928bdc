//! Tag constants for solution-owned resources
//!
//! Every taggable resource created by the orchestrator carries the solution
//! tag so that it can be found and attributed outside the ledger.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `sra-solution` | Solution name (`sra-bedrock-org`) |

/// Tag key identifying the owning solution
pub const TAG_SOLUTION: &str = "sra-solution";

/// Key/value pairs applied to every created resource
pub fn solution_tags(solution: &str) -> Vec<(&'static str, String)> {
    vec![(TAG_SOLUTION, solution.to_string())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solution_tags() {
        let tags = solution_tags("sra-bedrock-org");
        assert_eq!(tags, vec![("sra-solution", "sra-bedrock-org".to_string())]);
    }
}
