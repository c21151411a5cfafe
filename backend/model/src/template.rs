//! Placeholder substitution for build instructions.

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Values substituted into build instructions.
///
/// Only `{{REF_NUMBER}}` and `{{RELEASE_NUMBER}}` are recognized, anything
/// else between braces is copied verbatim.
#[derive(Debug, Clone, Copy)]
pub struct Placeholders<'a> {
	pub ref_number: &'a str,
	pub release_number: &'a str,
}

impl Placeholders<'_> {
	fn lookup(&self, token: &str) -> Option<&str> {
		match token {
			"REF_NUMBER" => Some(self.ref_number),
			"RELEASE_NUMBER" => Some(self.release_number),
			_ => None,
		}
	}

	/// Resolves every known placeholder in `template` in a single pass.
	///
	/// Substituted values are never scanned again.
	pub fn resolve(&self, template: &str) -> String {
		let mut out = String::with_capacity(template.len());
		let mut rest = template;
		while let Some(start) = rest.find(OPEN) {
			out.push_str(&rest[..start]);
			let after = &rest[start + OPEN.len()..];
			let resolved = after
				.find(CLOSE)
				.and_then(|end| Some((self.lookup(&after[..end])?, end)));
			match resolved {
				Some((value, end)) => {
					out.push_str(value);
					rest = &after[end + CLOSE.len()..];
				}
				None => {
					// the next brace may open a placeholder
					out.push('{');
					rest = &rest[start + 1..];
				}
			}
		}
		out.push_str(rest);
		out
	}
}

#[cfg(test)]
mod test {
	use super::*;

	const VALUES: Placeholders<'static> = Placeholders {
		ref_number: "refs/changes/01/101/1",
		release_number: "20250201090700~gitabc1234",
	};

	#[test]
	fn test_resolve_known_tokens() {
		assert_eq!(
			VALUES.resolve("make REF={{REF_NUMBER}} V={{RELEASE_NUMBER}} V2={{RELEASE_NUMBER}}"),
			"make REF=refs/changes/01/101/1 V=20250201090700~gitabc1234 V2=20250201090700~gitabc1234"
		);
		assert_eq!(VALUES.resolve("make"), "make");
	}

	#[test]
	fn test_values_are_not_rescanned() {
		let values = Placeholders {
			ref_number: "{{RELEASE_NUMBER}}",
			release_number: "1",
		};
		assert_eq!(values.resolve("{{REF_NUMBER}}"), "{{RELEASE_NUMBER}}");
	}

	#[test]
	fn test_unknown_and_unterminated() {
		assert_eq!(VALUES.resolve("echo {{HOME}}"), "echo {{HOME}}");
		assert_eq!(VALUES.resolve("{{{REF_NUMBER}}"), "{refs/changes/01/101/1");
		assert_eq!(VALUES.resolve("echo {{REF_NUMBER"), "echo {{REF_NUMBER");
		assert_eq!(VALUES.resolve("}} {{"), "}} {{");
	}
}
