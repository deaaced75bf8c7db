// HostLisp Session Counters
//
// Monotonic counters behind every generated host identifier. They live for
// the whole session so that names never collide across compile units.

#[derive(Default, Debug, Clone)]
pub struct Counters {
    pub variables: u64,
    pub literals: u64,
    pub blocks: u64,
    pub tagbodies: u64,
    pub go_tags: u64,
    pub units: u64,
}

impl Counters {
    /// A fresh host variable, readable after the Lisp name it stands for.
    pub fn variable(&mut self, hint: &str) -> String {
        self.variables = self.variables.saturating_add(1);
        format!("{}_{}", host_identifier(hint), self.variables)
    }

    pub fn literal(&mut self) -> String {
        self.literals = self.literals.saturating_add(1);
        format!("l{}", self.literals)
    }

    pub fn block(&mut self) -> String {
        self.blocks = self.blocks.saturating_add(1);
        format!("b{}", self.blocks)
    }

    /// Token variable and loop label of a new tagbody.
    pub fn tagbody(&mut self) -> (String, String) {
        self.tagbodies = self.tagbodies.saturating_add(1);
        (
            format!("tb{}", self.tagbodies),
            format!("tbloop{}", self.tagbodies),
        )
    }

    pub fn go_tag(&mut self) -> usize {
        self.go_tags = self.go_tags.saturating_add(1);
        self.go_tags as usize
    }

    pub fn unit(&mut self) -> u64 {
        self.units = self.units.saturating_add(1);
        self.units
    }
}

/// Lowercased ASCII alphanumerics of a Lisp name; everything else becomes
/// `_`. The counter suffix keeps the result clear of host keywords.
fn host_identifier(hint: &str) -> String {
    let mut out: String = hint
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 'v');
    }
    out
}
