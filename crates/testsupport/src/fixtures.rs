//! Bookstore test data.

use types::{FixedString, RecordError};

/// Key type used by the bookstore indexes.
pub type Title = FixedString<64>;

/// Build a title key.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// assert_eq!(title("Dune").unwrap().as_str(), "Dune");
/// assert!(title(&"x".repeat(65)).is_err());
/// ```
pub fn title(s: &str) -> Result<Title, RecordError> {
    FixedString::new(s)
}

/// `(title, year)` pairs with repeated titles, in no particular order.
pub fn bookshelf() -> Vec<(&'static str, i32)> {
    vec![
        ("CppPrimer", 2012),
        ("Dune", 1965),
        ("CppPrimer", 2001),
        ("Algernon", 1966),
        ("Dune", 2021),
        ("Emma", 1815),
        ("CppPrimer", 2005),
        ("Ulysses", 1922),
        ("Beloved", 1987),
        ("Dune", 1984),
    ]
}

/// The distinct years listed for `name` in [`bookshelf`], ascending.
pub fn years_of(name: &str) -> Vec<i32> {
    let mut years: Vec<i32> = bookshelf()
        .into_iter()
        .filter(|(t, _)| *t == name)
        .map(|(_, y)| y)
        .collect();
    years.sort_unstable();
    years.dedup();
    years
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn years_are_sorted() {
        assert_eq!(years_of("CppPrimer"), vec![2001, 2005, 2012]);
        assert_eq!(years_of("Missing"), Vec::<i32>::new());
    }
}
