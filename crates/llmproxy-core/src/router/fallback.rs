//! Model-tag fallback routing (spec §4.2: "an ordered list of fallback rules keyed by
//! model tag"). Grounded on the teacher's `llm::policy` routing-rule matcher, adapted
//! from provider/model selection to primary/fallback backend-name lists.

use crate::config::FallbackRule;

/// Given the backend the caller originally wanted (`primary`) and an optional model
/// tag extracted from the request body, returns the ordered list of backend names to
/// try after `primary` itself has been attempted and exhausted its retries.
pub fn fallback_chain<'a>(rules: &'a [FallbackRule], primary: &str, model_tag: Option<&str>) -> Vec<&'a str> {
	rules
		.iter()
		.filter(|r| r.primary == primary)
		.filter(|r| match (&r.model_tag, model_tag) {
			(Some(want), Some(got)) => want == got,
			(Some(_), None) => false,
			(None, _) => true,
		})
		.flat_map(|r| r.fallback.iter().map(String::as_str))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn rule(primary: &str, fallback: &[&str], model_tag: Option<&str>) -> FallbackRule {
		FallbackRule {
			primary: primary.to_string(),
			fallback: fallback.iter().map(|s| s.to_string()).collect(),
			model_tag: model_tag.map(String::from),
		}
	}

	#[test]
	fn untagged_rule_matches_any_model() {
		let rules = vec![rule("a", &["b", "c"], None)];
		assert_eq!(fallback_chain(&rules, "a", Some("gpt-4")), vec!["b", "c"]);
		assert_eq!(fallback_chain(&rules, "a", None), vec!["b", "c"]);
	}

	#[test]
	fn tagged_rule_requires_matching_tag() {
		let rules = vec![rule("a", &["b"], Some("gpt-4"))];
		assert_eq!(fallback_chain(&rules, "a", Some("gpt-4")), vec!["b"]);
		assert!(fallback_chain(&rules, "a", Some("claude")).is_empty());
		assert!(fallback_chain(&rules, "a", None).is_empty());
	}

	#[test]
	fn no_rule_for_other_primary() {
		let rules = vec![rule("a", &["b"], None)];
		assert!(fallback_chain(&rules, "z", None).is_empty());
	}
}
