/// Explicit result variant for extraction steps.
///
/// "No results" and "real failure" are different outcomes, not different
/// exception types: a listing container that never renders is `Empty`
/// (the seed has nothing to list), a timeout mid-traversal is `Retryable`,
/// and a missing seed file is `Fatal`. Callers branch on the variant.
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    Empty,
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Outcome::Empty)
    }

    /// Map the success value, preserving the other variants.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(v) => Outcome::Ok(f(v)),
            Outcome::Empty => Outcome::Empty,
            Outcome::Retryable(e) => Outcome::Retryable(e),
            Outcome::Fatal(e) => Outcome::Fatal(e),
        }
    }
}
