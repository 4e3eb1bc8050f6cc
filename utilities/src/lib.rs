//! Small helpers shared across the workspace.

use core::fmt;

use itertools::Itertools;

/// Wraps a cloneable iterator so it can be displayed lazily
/// (typically inside a log line) as `[a, b, c]`.
pub struct FormatIterator<I>(I);

impl<I> fmt::Display for FormatIterator<I>
where
	I: Iterator + Clone,
	I::Item: fmt::Display,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{}]", self.0.clone().format(", "))
	}
}

pub fn format_iterator<I>(iterable: I) -> FormatIterator<I::IntoIter>
where
	I: IntoIterator,
	I::IntoIter: Clone,
	I::Item: fmt::Display,
{
	FormatIterator(iterable.into_iter())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn formats_iterators_on_demand() {
		assert_eq!(format_iterator([1, 2, 3]).to_string(), "[1, 2, 3]");
		assert_eq!(format_iterator(Vec::<u8>::new()).to_string(), "[]");

		// The same wrapper can be displayed more than once
		let formatted = format_iterator(["a", "b"]);
		assert_eq!(formatted.to_string(), formatted.to_string());
	}
}
