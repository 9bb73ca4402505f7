use std::fmt;
use std::path::PathBuf;

/// Which piece of a page an adapter was trying to read when it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Title,
    Author,
    CoverImage,
    ChapterList,
    ChapterContent,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Title => "title",
            Stage::Author => "author",
            Stage::CoverImage => "cover image",
            Stage::ChapterList => "chapter list",
            Stage::ChapterContent => "chapter content",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no source adapter matches url {url}")]
    SourceNotFound { url: String },

    #[error("could not extract {stage} from {url}")]
    Extraction { stage: Stage, url: String },

    #[error("failed to fetch chapter {url}: {reason}")]
    FetchFailure { url: String, reason: String },

    #[error("failed to parse chapter {url}: {reason}")]
    ParseFailure { url: String, reason: String },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("epub at {path} is not a managed webnovel archive: {reason}")]
    InvalidArchive { path: PathBuf, reason: String },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("cannot write archive {path}: {reason}")]
    ArchiveWrite { path: PathBuf, reason: String },

    #[error("none of the requested sources could be scraped")]
    NothingScraped,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn extraction(stage: Stage, url: impl Into<String>) -> Self {
        Error::Extraction {
            stage,
            url: url.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_message_names_stage_and_url() {
        let err = Error::extraction(Stage::ChapterList, "https://novelbin.me/b/x");
        assert_eq!(
            err.to_string(),
            "could not extract chapter list from https://novelbin.me/b/x"
        );
    }
}
