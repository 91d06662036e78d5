//! Plain-text rendering of archive results for toots.

use wayback_core::ports::Collect;

/// Default Mastodon status length limit.
pub const MAX_STATUS_CHARS: usize = 500;

/// Render results as plain text: one `Backend:` header per collect followed
/// by a `• <archived>` line per source.
pub fn text(results: &[Collect]) -> String {
    let mut blocks = Vec::new();
    for col in results {
        if col.dst.is_empty() {
            continue;
        }
        let mut block = format!("{}:", col.arc);
        for dst in col.dst.values() {
            block.push_str("\n• ");
            block.push_str(dst);
        }
        blocks.push(block);
    }
    blocks.join("\n\n")
}

/// Split the results into toots of at most [`MAX_STATUS_CHARS`], each
/// prefixed with `mention`.
///
/// Lines are kept whole where possible; a line longer than a toot is cut at
/// the character budget. A backend header always shares its toot with the
/// start of its first bullet.
pub fn toots(mention: &str, results: &[Collect]) -> Vec<String> {
    let budget = MAX_STATUS_CHARS
        .saturating_sub(mention.chars().count())
        .max(1);
    let mut packer = Packer::new(mention, budget);

    for col in results.iter().filter(|c| !c.dst.is_empty()) {
        packer.gap();
        let header = format!("{}:", col.arc);
        let header_len = header.chars().count();
        let mut bullets = col.dst.values().map(|dst| format!("• {dst}"));

        if header_len + 1 < budget {
            if let Some(first) = bullets.next() {
                let mut pieces = split_chars(&first, budget - header_len - 1, budget);
                let head = pieces.remove(0);
                packer.push(&format!("{header}\n{head}"));
                for piece in pieces {
                    packer.push(&piece);
                }
            }
        } else {
            for piece in split_chars(&header, budget, budget) {
                packer.push(&piece);
            }
        }

        for bullet in bullets {
            for piece in split_chars(&bullet, budget, budget) {
                packer.push(&piece);
            }
        }
    }
    packer.finish()
}

/// Greedy line packer; every pushed unit must fit within `budget`.
struct Packer<'a> {
    mention: &'a str,
    budget: usize,
    out: Vec<String>,
    current: String,
    len: usize,
}

impl<'a> Packer<'a> {
    fn new(mention: &'a str, budget: usize) -> Self {
        Self {
            mention,
            budget,
            out: Vec::new(),
            current: String::new(),
            len: 0,
        }
    }

    fn push(&mut self, unit: &str) {
        let n = unit.chars().count();
        if self.len > 0 && self.len + 1 + n > self.budget {
            self.flush();
        }
        if self.len > 0 {
            self.current.push('\n');
            self.len += 1;
        }
        self.current.push_str(unit);
        self.len += n;
    }

    /// Blank line between backends; dropped at a toot boundary.
    fn gap(&mut self) {
        if self.len > 0 {
            self.push("");
        }
    }

    fn flush(&mut self) {
        let body = self.current.trim_end();
        if !body.is_empty() {
            self.out.push(format!("{}{body}", self.mention));
        }
        self.current.clear();
        self.len = 0;
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.out
    }
}

/// Cut `line` into pieces: the first at most `first` chars, the rest at most
/// `rest` chars. Always yields at least one piece.
fn split_chars(line: &str, first: usize, rest: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut chars = line.chars().peekable();
    let mut cap = first.max(1);
    while chars.peek().is_some() {
        pieces.push(chars.by_ref().take(cap).collect());
        cap = rest.max(1);
    }
    if pieces.is_empty() {
        pieces.push(String::new());
    }
    pieces
}
