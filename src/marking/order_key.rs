use std::cmp::Ordering;

/// Logical position of a question or sub-question label.
///
/// Compared lexicographically: question number first, then one integer per nesting level, so a
/// parent sorts before its parts (`11 < 11a < 11a(i) < 11b < 12`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct OrderKey {
    question: u32,
    parts: Vec<u32>,
}

impl OrderKey {
    pub(crate) fn parse(label: &str) -> Option<Self> {
        let (question, rest) = split_leading_number(label)?;
        Some(Self { question, parts: part_segments(rest, 0) })
    }

    pub(crate) fn depth(&self) -> usize {
        self.parts.len()
    }

    /// Key of a nested part. Labels may be relative (`i` under `a`) or already carry the parent
    /// path (`a(i)` under `a`, `11a` under `11`); both resolve to the same key.
    pub(crate) fn child(&self, part_label: &str) -> Self {
        let label = match split_leading_number(part_label) {
            Some((number, rest)) if number == self.question => rest,
            _ => part_label,
        };

        let absolute = part_segments(label, 0);
        if absolute.len() > self.parts.len() && absolute.starts_with(&self.parts) {
            return Self { question: self.question, parts: absolute };
        }

        let mut parts = self.parts.clone();
        parts.extend(part_segments(label, self.parts.len()));
        Self { question: self.question, parts }
    }
}

/// Numeric-aware ordering for question numbers with an alphanumeric fallback.
pub(crate) fn compare_question_numbers(a: &str, b: &str) -> Ordering {
    match (split_leading_number(a), split_leading_number(b)) {
        (Some((number_a, rest_a)), Some((number_b, rest_b))) => number_a
            .cmp(&number_b)
            .then_with(|| part_segments(rest_a, 0).cmp(&part_segments(rest_b, 0)))
            .then_with(|| a.to_lowercase().cmp(&b.to_lowercase())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

/// Leading integer of a label, tolerating a `Q`/`Question` prefix, plus the remainder.
pub(crate) fn split_leading_number(label: &str) -> Option<(u32, &str)> {
    let trimmed = label.trim();
    let lowered = trimmed.to_ascii_lowercase();
    let skip = if lowered.starts_with("question") {
        "question".len()
    } else if lowered.starts_with('q') {
        1
    } else {
        0
    };
    let body = trimmed[skip..].trim_start_matches([' ', '.', ':']);

    let digits_end = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
    if digits_end == 0 {
        return None;
    }
    let number = body[..digits_end].parse::<u32>().ok()?;
    Some((number, &body[digits_end..]))
}

fn part_segments(text: &str, start_depth: usize) -> Vec<u32> {
    let mut segments = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(d);
                chars.next();
            }
            segments.push(digits.parse::<u32>().unwrap_or(u32::MAX));
        } else if c.is_alphabetic() {
            let mut run = String::new();
            while let Some(&l) = chars.peek().filter(|l| l.is_alphabetic()) {
                run.extend(l.to_lowercase());
                chars.next();
            }
            let depth = start_depth + segments.len();
            letter_segments(&run, depth, &mut segments);
        } else {
            chars.next();
        }
    }

    segments
}

fn letter_segments(run: &str, depth: usize, out: &mut Vec<u32>) {
    let Some(first) = run.chars().next() else {
        return;
    };

    if is_roman(run) && (depth >= 1 || run.len() > 1) {
        out.push(roman_value(run));
        return;
    }

    out.push(alpha_value(first));
    letter_segments(&run[first.len_utf8()..], depth + 1, out);
}

// Exam parts rarely run past (xx); restricting to i/v/x keeps letters like `c` and `d` alphabetic.
fn is_roman(run: &str) -> bool {
    !run.is_empty() && run.len() <= 6 && run.chars().all(|c| matches!(c, 'i' | 'v' | 'x'))
}

fn roman_value(run: &str) -> u32 {
    let values: Vec<u32> = run
        .chars()
        .map(|c| match c {
            'i' => 1,
            'v' => 5,
            _ => 10,
        })
        .collect();

    let mut total = 0i64;
    for (idx, value) in values.iter().enumerate() {
        let next = values.get(idx + 1).copied().unwrap_or(0);
        if *value < next {
            total -= i64::from(*value);
        } else {
            total += i64::from(*value);
        }
    }
    u32::try_from(total.max(1)).unwrap_or(1)
}

fn alpha_value(c: char) -> u32 {
    if c.is_ascii_lowercase() {
        u32::from(c) - u32::from('a') + 1
    } else {
        27
    }
}
