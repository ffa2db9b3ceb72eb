// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret wrapper type for kt.
//!
//! [`Secret<T>`] keeps a sensitive value (SSH passwords, registry tokens) out
//! of `Debug`/`Display` output and log fields. The inner value is zeroized
//! on drop. Access is explicit through [`Secret::expose`].

use std::fmt;
use zeroize::Zeroize;

/// Placeholder printed instead of a secret value.
pub const REDACTED: &str = "[REDACTED]";

/// A value that must never be printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret<T: Zeroize> {
	inner: T,
}

/// Convenience alias for the common string case.
pub type SecretString = Secret<String>;

impl<T: Zeroize> Secret<T> {
	pub fn new(inner: T) -> Self {
		Self { inner }
	}

	/// Borrow the wrapped value.
	pub fn expose(&self) -> &T {
		&self.inner
	}
}

impl<T: Zeroize> Drop for Secret<T> {
	fn drop(&mut self) {
		self.inner.zeroize();
	}
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl<T: Zeroize> fmt::Display for Secret<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl From<String> for SecretString {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

impl From<&str> for SecretString {
	fn from(value: &str) -> Self {
		Self::new(value.to_string())
	}
}

#[cfg(feature = "serde")]
impl<T: Zeroize + serde::Serialize> serde::Serialize for Secret<T> {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(REDACTED)
	}
}

#[cfg(feature = "serde")]
impl<'de, T: Zeroize + serde::Deserialize<'de>> serde::Deserialize<'de> for Secret<T> {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		T::deserialize(deserializer).map(Secret::new)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn debug_and_display_are_redacted() {
		let secret = SecretString::from("root");
		assert_eq!(format!("{secret:?}"), REDACTED);
		assert_eq!(format!("{secret}"), REDACTED);
		assert_eq!(secret.expose(), "root");
	}

	#[test]
	fn serialize_never_leaks() {
		let secret = SecretString::from("hunter2");
		let json = serde_json::to_string(&secret).unwrap();
		assert_eq!(json, format!("\"{REDACTED}\""));
	}

	#[test]
	fn deserialize_keeps_value() {
		let secret: SecretString = serde_json::from_str("\"pw\"").unwrap();
		assert_eq!(secret.expose(), "pw");
	}

	proptest! {
		#[test]
		fn debug_output_never_contains_value(value in "[a-z0-9]{8,32}") {
			let secret = SecretString::new(value.clone());
			let rendered = format!("{secret:?} {secret}");
			prop_assert!(!rendered.contains(&value));
		}
	}
}
