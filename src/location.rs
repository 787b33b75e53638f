use std::fmt;
use std::str::FromStr;

/// What a probe attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Kind {
    ArrayGet,
    ArraySet,
    Call,
    Catch,
    Checkcast,
    #[default]
    Entry,
    Error,
    FieldGet,
    FieldSet,
    Instanceof,
    Line,
    New,
    Newarray,
    Return,
    SyncEntry,
    SyncExit,
    Throw,
}

impl Kind {
    pub const ALL: [Kind; 17] = [
        Kind::ArrayGet,
        Kind::ArraySet,
        Kind::Call,
        Kind::Catch,
        Kind::Checkcast,
        Kind::Entry,
        Kind::Error,
        Kind::FieldGet,
        Kind::FieldSet,
        Kind::Instanceof,
        Kind::Line,
        Kind::New,
        Kind::Newarray,
        Kind::Return,
        Kind::SyncEntry,
        Kind::SyncExit,
        Kind::Throw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::ArrayGet => "ARRAY_GET",
            Kind::ArraySet => "ARRAY_SET",
            Kind::Call => "CALL",
            Kind::Catch => "CATCH",
            Kind::Checkcast => "CHECKCAST",
            Kind::Entry => "ENTRY",
            Kind::Error => "ERROR",
            Kind::FieldGet => "FIELD_GET",
            Kind::FieldSet => "FIELD_SET",
            Kind::Instanceof => "INSTANCEOF",
            Kind::Line => "LINE",
            Kind::New => "NEW",
            Kind::Newarray => "NEWARRAY",
            Kind::Return => "RETURN",
            Kind::SyncEntry => "SYNC_ENTRY",
            Kind::SyncExit => "SYNC_EXIT",
            Kind::Throw => "THROW",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_").to_ascii_uppercase();
        Kind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown location kind {s:?}"))
    }
}

/// Placement relative to the matched instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Where {
    #[default]
    Before,
    After,
}

impl fmt::Display for Where {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Where::Before => f.write_str("BEFORE"),
            Where::After => f.write_str("AFTER"),
        }
    }
}

impl FromStr for Where {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "before" => Ok(Where::Before),
            "after" => Ok(Where::After),
            _ => Err(format!("unknown placement {s:?}")),
        }
    }
}

/// One injection point. Empty strings mean "not constrained" and line 0 means
/// no particular line. No validation happens here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub clazz: String,
    pub method: String,
    /// Field type or call descriptor, depending on the kind.
    pub type_name: String,
    pub field: String,
    pub line: u32,
    pub kind: Kind,
    pub placement: Where,
}

impl Location {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn set_clazz(&mut self, clazz: impl Into<String>) -> &mut Self {
        self.clazz = clazz.into();
        self
    }

    pub fn set_method(&mut self, method: impl Into<String>) -> &mut Self {
        self.method = method.into();
        self
    }

    pub fn set_type(&mut self, type_name: impl Into<String>) -> &mut Self {
        self.type_name = type_name.into();
        self
    }

    pub fn set_field(&mut self, field: impl Into<String>) -> &mut Self {
        self.field = field.into();
        self
    }

    pub fn set_line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    pub fn set_kind(&mut self, kind: Kind) -> &mut Self {
        self.kind = kind;
        self
    }

    pub fn set_where(&mut self, placement: Where) -> &mut Self {
        self.placement = placement;
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Location{{clazz={}, method={}, type={}, field={}, line={}, kind={}, where={}}}",
            self.clazz,
            self.method,
            self.type_name,
            self.field,
            self.line,
            self.kind,
            self.placement
        )
    }
}
