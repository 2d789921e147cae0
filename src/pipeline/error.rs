/// Failure of one merge request. Every variant is terminal for that request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    /// Missing or empty input; the caller can fix it.
    #[error("{0}")]
    Validation(String),

    /// Vision, text or image-generation backend failure, carrying the upstream message.
    #[error("{0}")]
    Backend(String),

    /// Session artifacts or the activity log could not be written.
    #[error("{0}")]
    Persistence(String),
}

impl MergeError {
    /// Alternate formatting keeps the full `anyhow` context chain.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        MergeError::Backend(format!("{err:#}"))
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        MergeError::Persistence(format!("{err:#}"))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MergeError::Validation(_) => "validation",
            MergeError::Backend(_) => "backend",
            MergeError::Persistence(_) => "persistence",
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn keeps_the_context_chain_of_upstream_errors() {
        let err = anyhow!("Permission denied (os error 13)")
            .context("Failed to write 'uploads/2026-03-14_09-26-53_unknown/result.png'");
        assert_eq!(
            MergeError::persistence(err),
            MergeError::Persistence(
                "Failed to write 'uploads/2026-03-14_09-26-53_unknown/result.png': Permission denied (os error 13)"
                    .to_string()
            )
        );
        assert_eq!(
            MergeError::backend("rate limited").to_string(),
            "rate limited"
        );
    }
}
