// Package-name shape checks and category expansion against the library.
use crate::core::error::{Error, ErrorKind};
use crate::core::library::Library;

/// Expand a package token into a `category/name` atom.
///
/// Qualified names are validated for shape and passed through; bare names
/// are expanded by searching the library's md5-cache for an owning
/// category.
pub fn expand(token: &str, library: &Library) -> Result<String, Error> {
    match token.split_once('/') {
        Some((category, name)) => {
            if !is_valid_name(category) || !is_valid_name(name) {
                return Err(Error::new(ErrorKind::Parse)
                    .with_message("invalid package atom")
                    .with_token(token));
            }
            Ok(token.to_string())
        }
        None => {
            if !is_valid_name(token) {
                return Err(Error::new(ErrorKind::Parse)
                    .with_message("invalid package name")
                    .with_token(token));
            }
            let owners = library.categories_owning(token);
            match owners.len() {
                0 => Err(Error::new(ErrorKind::Parse)
                    .with_message("unable to determine the category (mistyped name?)")
                    .with_token(token)),
                1 => Ok(format!("{}/{token}", owners[0])),
                _ => {
                    let matches = owners
                        .iter()
                        .map(|category| format!("{category}/{token}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    Err(Error::new(ErrorKind::Ambiguous)
                        .with_message(format!("ambiguous package name, matching: {matches}"))
                        .with_token(token))
                }
            }
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '.' | '-'))
}
