use super::HmsCode;

/// Operator-supplied list of HMS codes that never enter the fault table.
///
/// Entries may be separated by commas, semicolons, whitespace or newlines and
/// are matched case-insensitively. A fault is ignored when its full
/// `HMS_xxxx_xxxx_xxxx_xxxx` rendering appears in the normalised list; a
/// partial entry such as `HMS_0300_1200` matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    normalized: String,
}

impl IgnoreList {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw
            .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(str::to_ascii_uppercase)
            .collect::<Vec<_>>()
            .join("\n");
        Self { normalized }
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    pub fn len(&self) -> usize {
        self.normalized.lines().count()
    }

    pub fn is_ignored(&self, code: HmsCode) -> bool {
        if self.normalized.is_empty() {
            return false;
        }
        self.normalized.contains(code.render().as_str())
    }

    pub fn is_ignored_fault(&self, attr: u32, code: u32) -> bool {
        self.is_ignored(HmsCode::new(attr, code))
    }

    /// Normalised form, one entry per line.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }
}
