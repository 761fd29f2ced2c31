use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CssError {
    Malformed(String),
}

impl fmt::Display for CssError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CssError::Malformed(message) => write!(f, "malformed stylesheet: {}", message),
        }
    }
}

impl std::error::Error for CssError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    SizeUndetermined,
    InvalidAspectRatio(String),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::SizeUndetermined => {
                write!(f, "cannot determine the size of the drawing")
            }
            TransformError::InvalidAspectRatio(value) => {
                write!(f, "invalid preserveAspectRatio value: {:?}", value)
            }
        }
    }
}

impl std::error::Error for TransformError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    IdNotFound(String),
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::IdNotFound(id) => write!(f, "object {} not found in loaded source", id),
        }
    }
}

impl std::error::Error for ExtractError {}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleError {
    MissingIds(Vec<String>),
    InvalidBox { id: String, reason: String },
    Malformed(String),
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleError::MissingIds(ids) => {
                write!(f, "no bounding box reported for: {}", ids.join(", "))
            }
            OracleError::InvalidBox { id, reason } => {
                write!(f, "invalid bounding box for {}: {}", id, reason)
            }
            OracleError::Malformed(message) => {
                write!(f, "unreadable bounding box listing: {}", message)
            }
        }
    }
}

impl std::error::Error for OracleError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    Xml(String),
    NoSvgRoot(String),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::Xml(message) => write!(f, "xml error: {}", message),
            DocumentError::NoSvgRoot(found) => {
                write!(f, "root element must be <svg>, found <{}>", found)
            }
        }
    }
}

impl std::error::Error for DocumentError {}

#[derive(Debug)]
pub enum IconizeError {
    Css(CssError),
    Transform(TransformError),
    Extract(ExtractError),
    Oracle(OracleError),
    Document(DocumentError),
    InvalidConfiguration(String),
    Io(std::io::Error),
}

impl fmt::Display for IconizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IconizeError::Css(err) => write!(f, "css error: {}", err),
            IconizeError::Transform(err) => write!(f, "viewport error: {}", err),
            IconizeError::Extract(err) => write!(f, "extract error: {}", err),
            IconizeError::Oracle(err) => write!(f, "bounding box error: {}", err),
            IconizeError::Document(err) => write!(f, "document error: {}", err),
            IconizeError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            IconizeError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for IconizeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IconizeError::Css(err) => Some(err),
            IconizeError::Transform(err) => Some(err),
            IconizeError::Extract(err) => Some(err),
            IconizeError::Oracle(err) => Some(err),
            IconizeError::Document(err) => Some(err),
            IconizeError::Io(err) => Some(err),
            IconizeError::InvalidConfiguration(_) => None,
        }
    }
}

impl From<CssError> for IconizeError {
    fn from(value: CssError) -> Self {
        IconizeError::Css(value)
    }
}

impl From<TransformError> for IconizeError {
    fn from(value: TransformError) -> Self {
        IconizeError::Transform(value)
    }
}

impl From<ExtractError> for IconizeError {
    fn from(value: ExtractError) -> Self {
        IconizeError::Extract(value)
    }
}

impl From<OracleError> for IconizeError {
    fn from(value: OracleError) -> Self {
        IconizeError::Oracle(value)
    }
}

impl From<DocumentError> for IconizeError {
    fn from(value: DocumentError) -> Self {
        IconizeError::Document(value)
    }
}

impl From<std::io::Error> for IconizeError {
    fn from(value: std::io::Error) -> Self {
        IconizeError::Io(value)
    }
}
