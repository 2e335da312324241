//! Task document engine for daily notes.
//!
//! A note is free-form text with embedded to-do markup (`- [ ] ...` lines).
//! The engine parses that text into an ordered [`core::Document`] of tasks and
//! prose, resolves tasks by fuzzy text, applies status/position/comment
//! mutations on structural clones, and renders the result back to text.
//! Every call is a fresh parse; no state persists between calls and the
//! engine performs no file I/O.

pub mod core {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /* ------------------------------- Status ------------------------------- */

    /// Closed status set; the checkbox character is the wire representation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum TaskStatus {
        Pending,
        Completed,
        Abandoned,
        Moved,
    }

    impl TaskStatus {
        pub fn checkbox_char(self) -> char {
            match self {
                TaskStatus::Pending => ' ',
                TaskStatus::Completed => 'x',
                TaskStatus::Abandoned => '-',
                TaskStatus::Moved => '>',
            }
        }

        pub fn from_checkbox_char(c: char) -> Option<Self> {
            match c {
                ' ' => Some(TaskStatus::Pending),
                'x' => Some(TaskStatus::Completed),
                '-' => Some(TaskStatus::Abandoned),
                '>' => Some(TaskStatus::Moved),
                _ => None,
            }
        }

        pub fn label(self) -> &'static str {
            match self {
                TaskStatus::Pending => "pending",
                TaskStatus::Completed => "completed",
                TaskStatus::Abandoned => "abandoned",
                TaskStatus::Moved => "moved",
            }
        }
    }

    impl fmt::Display for TaskStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.label())
        }
    }

    /* -------------------------------- Model -------------------------------- */

    /// Time annotations stripped from a task line, kept as source strings
    /// (`HH:MM-HH:MM` / `~HH:MM` for scheduled, `HH:MM` or
    /// `HH:MM YYYY-MM-DD` for completed).
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct TimeInfo {
        pub scheduled: Option<String>,
        pub completed: Option<String>,
    }

    /// A single to-do entry. `description` is annotation-stripped; the raw
    /// source line survives in `original_line` for lookup and diagnostics.
    /// `line_index` records where the line sat in the source text and is
    /// informational only; sequence order in the document is authoritative.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Task {
        pub status: TaskStatus,
        pub emoji: Option<char>,
        #[serde(default)]
        pub time: TimeInfo,
        pub description: String,
        pub original_line: String,
        /// Multi-line comment block; empty when absent. Lines are stored
        /// with their four-space indentation included.
        #[serde(default)]
        pub comment: String,
        /// Destination note when the task was moved away.
        pub target: Option<String>,
        /// Origin note when the task arrived from a move.
        pub source: Option<String>,
        pub line_index: usize,
    }

    impl Task {
        pub fn new(description: impl Into<String>) -> Self {
            Self {
                status: TaskStatus::Pending,
                emoji: None,
                time: TimeInfo::default(),
                description: description.into(),
                original_line: String::new(),
                comment: String::new(),
                target: None,
                source: None,
                line_index: 0,
            }
        }

        pub fn has_comment(&self) -> bool {
            !self.comment.is_empty()
        }

        /// Identity used by removal and move: `(description, status)`
        /// equality. Duplicates are indistinguishable; the first match in
        /// sequence order wins.
        pub fn matches_identity(&self, other: &Task) -> bool {
            self.description == other.description && self.status == other.status
        }
    }

    /// A contiguous run of non-task lines, preserved verbatim.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TextBlock {
        pub content: String,
        pub line_index: usize,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "lowercase")]
    pub enum Node {
        Task(Task),
        Text(TextBlock),
    }

    impl Node {
        pub fn is_task(&self) -> bool {
            matches!(self, Node::Task(_))
        }

        pub fn as_task(&self) -> Option<&Task> {
            match self {
                Node::Task(t) => Some(t),
                Node::Text(_) => None,
            }
        }

        pub fn as_task_mut(&mut self) -> Option<&mut Task> {
            match self {
                Node::Task(t) => Some(t),
                Node::Text(_) => None,
            }
        }
    }

    /// Ordered document model. Sequence order in `content` is the sole
    /// source of truth for serialization. Mutating operations clone the
    /// whole value and return a new one; the caller's document is never
    /// touched.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Document {
        pub path: String,
        pub content: Vec<Node>,
    }

    impl Document {
        pub fn new(path: impl Into<String>) -> Self {
            Self {
                path: path.into(),
                content: Vec::new(),
            }
        }

        pub fn tasks(&self) -> impl Iterator<Item = &Task> {
            self.content.iter().filter_map(Node::as_task)
        }
    }

    /* ------------------------------- Errors ------------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum EngineError {
        #[error("no task matching {query:?} in {path}")]
        NotFound { path: String, query: String },
        #[error("{count} tasks match {query:?} in {path}; be more specific")]
        Ambiguous {
            path: String,
            query: String,
            count: usize,
        },
        #[error("task {query:?} in {path} is {actual}, not {expected}")]
        InvalidState {
            path: String,
            query: String,
            actual: TaskStatus,
            expected: &'static str,
        },
        #[error("insertion index {index} is out of bounds for a document of {len} nodes")]
        OutOfBounds { index: usize, len: usize },
        #[error("file not found: {path}")]
        FileMissing { path: String },
        #[error("{0}")]
        Validation(ValidationFailure),
    }

    pub type EngineResult<T> = Result<T, EngineError>;

    /// Aggregated batch-validation report, rendered as one message naming
    /// every offending query.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ValidationFailure {
        pub path: String,
        pub unresolved: Vec<String>,
        pub wrong_state: Vec<(String, TaskStatus)>,
    }

    impl fmt::Display for ValidationFailure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "validation failed for {}", self.path)?;
            if !self.unresolved.is_empty() {
                let listed = self
                    .unresolved
                    .iter()
                    .map(|q| format!("{q:?}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "; unresolved: {listed}")?;
            }
            if !self.wrong_state.is_empty() {
                let listed = self
                    .wrong_state
                    .iter()
                    .map(|(q, s)| format!("{q:?} ({s})"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "; wrong state: {listed}")?;
            }
            Ok(())
        }
    }

}

pub mod parser {
    //! Line scanner: raw note text → [`Document`].
    //!
    //! A line starting with `- [<status>] ` opens a task; a line immediately
    //! following an open task that is quote-prefixed or indented extends its
    //! comment; everything else coalesces into text blocks. The scanner is
    //! total: any line it does not recognize is prose, so parsing never
    //! fails.

    use crate::core::*;
    use log::debug;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::take_while_m_n,
        character::complete::{char, one_of, satisfy, space1},
        combinator::{all_consuming, eof, map_opt, opt, recognize},
        sequence::{preceded, terminated, tuple},
    };

    const MOVE_ARROW: &str = " → ";
    const SOURCE_PREFIX: &str = " (from ";

    /* --------------------------- Public entry --------------------------- */

    pub fn parse_document(path: &str, text: &str) -> Document {
        let mut content: Vec<Node> = Vec::new();
        let mut block: Vec<&str> = Vec::new();
        let mut block_start = 0usize;

        for (idx, line) in text.lines().enumerate() {
            if let Some(task) = parse_task_line(line, idx) {
                flush_block(&mut content, &mut block, block_start);
                content.push(Node::Task(task));
                continue;
            }

            // A comment continues the preceding task only while nothing
            // else intervened; an unflushed text block closes the task.
            if block.is_empty() {
                if let Some(body) = comment_body(line) {
                    if let Some(Node::Task(task)) = content.last_mut() {
                        task.append_comment_line(body);
                        continue;
                    }
                }
            }

            if block.is_empty() {
                block_start = idx;
            }
            block.push(line);
        }
        flush_block(&mut content, &mut block, block_start);

        debug!(
            "parsed {}: {} nodes ({} tasks)",
            path,
            content.len(),
            content.iter().filter(|n| n.is_task()).count()
        );
        Document {
            path: path.to_string(),
            content,
        }
    }

    /// Parse one source line as a task, extracting annotations into their
    /// dedicated fields. Head annotations (emoji, scheduled time) and tail
    /// annotations (completion time, move target, move source) are stripped
    /// independently; whatever remains, trimmed, is the description.
    pub fn parse_task_line(line: &str, line_index: usize) -> Option<Task> {
        let (rest, status) = task_prefix(line).ok()?;

        let mut head = rest;
        let mut emoji = None;
        if let Ok((r, c)) = leading_emoji(head) {
            emoji = Some(c);
            head = r;
        }
        let mut scheduled = None;
        if let Ok((r, s)) = scheduled_token(head) {
            scheduled = Some(s.to_string());
            head = r;
        }

        let mut tail = head.trim_end();
        let mut completed = None;
        // Trailing time and target are captured only for the statuses that
        // render them back, so other lines round-trip untouched.
        if status == TaskStatus::Completed {
            if let Some((left, time)) = split_trailing_completed(tail) {
                completed = Some(time);
                tail = left;
            }
        }
        let mut target = None;
        if status == TaskStatus::Moved {
            if let Some((left, t)) = split_trailing_target(tail) {
                target = Some(t);
                tail = left;
            }
        }
        let mut source = None;
        if let Some((left, s)) = split_trailing_source(tail) {
            source = Some(s);
            tail = left;
        }

        Some(Task {
            status,
            emoji,
            time: TimeInfo {
                scheduled,
                completed,
            },
            description: tail.trim().to_string(),
            original_line: line.to_string(),
            comment: String::new(),
            target,
            source,
            line_index,
        })
    }

    /* ------------------------------ Helpers ------------------------------ */

    fn flush_block(content: &mut Vec<Node>, lines: &mut Vec<&str>, start: usize) {
        if lines.is_empty() {
            return;
        }
        content.push(Node::Text(TextBlock {
            content: lines.join("\n"),
            line_index: start,
        }));
        lines.clear();
    }

    /// Comment detection: `> ` quote prefix, one tab, or four spaces. The
    /// recognized prefix is stripped here and re-applied canonically (four
    /// spaces) by `Task::append_comment_line`, so quote and tab comments do
    /// not round-trip byte-for-byte.
    fn comment_body(line: &str) -> Option<&str> {
        line.strip_prefix("> ")
            .or_else(|| line.strip_prefix('\t'))
            .or_else(|| line.strip_prefix("    "))
    }

    fn task_prefix(i: &str) -> IResult<&str, TaskStatus> {
        let (i, _) = char('-')(i)?;
        let (i, _) = char(' ')(i)?;
        let (i, _) = char('[')(i)?;
        let (i, status) = map_opt(one_of(" x->"), TaskStatus::from_checkbox_char)(i)?;
        let (i, _) = char(']')(i)?;
        let (i, _) = alt((space1, eof))(i)?;
        Ok((i, status))
    }

    /// A leading emoji: one non-ASCII, non-alphanumeric character followed
    /// by whitespace. Accented letters are alphanumeric and thus never
    /// mistaken for an emoji.
    fn leading_emoji(i: &str) -> IResult<&str, char> {
        terminated(satisfy(|c| !c.is_ascii() && !c.is_alphanumeric()), space1)(i)
    }

    /// `HH:MM-HH:MM` range or `~HH:MM` approximation, followed by
    /// whitespace.
    fn scheduled_token(i: &str) -> IResult<&str, &str> {
        terminated(
            alt((
                recognize(tuple((clock_time, char('-'), clock_time))),
                recognize(preceded(char('~'), clock_time)),
            )),
            space1,
        )(i)
    }

    fn clock_time(i: &str) -> IResult<&str, &str> {
        recognize(tuple((
            take_while_m_n(1, 2, |c: char| c.is_ascii_digit()),
            char(':'),
            take_while_m_n(2, 2, |c: char| c.is_ascii_digit()),
        )))(i)
    }

    fn date_token(i: &str) -> IResult<&str, &str> {
        recognize(tuple((
            take_while_m_n(4, 4, |c: char| c.is_ascii_digit()),
            char('-'),
            take_while_m_n(2, 2, |c: char| c.is_ascii_digit()),
            char('-'),
            take_while_m_n(2, 2, |c: char| c.is_ascii_digit()),
        )))(i)
    }

    /// `(HH:MM)` or `(HH:MM YYYY-MM-DD)` at the very end of the line.
    fn split_trailing_completed(text: &str) -> Option<(&str, String)> {
        let stripped = text.trim_end().strip_suffix(')')?;
        let open = stripped.rfind('(')?;
        let inner = &stripped[open + 1..];
        all_consuming(recognize(tuple((
            clock_time,
            opt(preceded(char(' '), date_token)),
        ))))(inner)
        .ok()?;
        Some((stripped[..open].trim_end(), inner.to_string()))
    }

    fn split_trailing_target(text: &str) -> Option<(&str, String)> {
        let pos = text.rfind(MOVE_ARROW)?;
        let target = text[pos + MOVE_ARROW.len()..].trim();
        if target.is_empty() {
            return None;
        }
        Some((text[..pos].trim_end(), target.to_string()))
    }

    fn split_trailing_source(text: &str) -> Option<(&str, String)> {
        let stripped = text.trim_end().strip_suffix(')')?;
        let pos = stripped.rfind(SOURCE_PREFIX)?;
        let source = stripped[pos + SOURCE_PREFIX.len()..].trim();
        if source.is_empty() {
            return None;
        }
        Some((stripped[..pos].trim_end(), source.to_string()))
    }

}

pub mod format {
    //! [`Document`] → raw text, the inverse of the parser for well-formed
    //! input. Formatting always regenerates the whole document; the grammar
    //! here must stay in lockstep with the parser.

    use crate::core::*;

    pub fn format_document(doc: &Document) -> String {
        doc.content
            .iter()
            .map(node_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn node_text(node: &Node) -> String {
        match node {
            Node::Text(block) => block.content.clone(),
            Node::Task(task) => render_task(task),
        }
    }

    /// Full task rendering: the line plus its comment block, if any.
    pub fn render_task(task: &Task) -> String {
        let mut out = render_task_line(task);
        if task.has_comment() {
            out.push('\n');
            out.push_str(&task.comment);
        }
        out
    }

    /// The task line alone: checkbox, emoji, scheduled time, description,
    /// then status-dependent suffixes.
    pub fn render_task_line(task: &Task) -> String {
        let mut line = String::from("- [");
        line.push(task.status.checkbox_char());
        line.push_str("] ");
        if let Some(emoji) = task.emoji {
            line.push(emoji);
            line.push(' ');
        }
        if let Some(scheduled) = &task.time.scheduled {
            line.push_str(scheduled);
            line.push(' ');
        }
        line.push_str(&task.description);
        if task.status == TaskStatus::Completed {
            if let Some(time) = &task.time.completed {
                // `complete` embeds the suffix in the description; a parsed
                // line instead keeps the stripped suffix trailing in
                // `original_line`, which tells the two apart when the
                // description happens to end with the same text.
                let suffix = format!("({time})");
                let embedded = task.description.ends_with(&suffix)
                    && !task.original_line.ends_with(&suffix);
                if !embedded {
                    line.push(' ');
                    line.push_str(&suffix);
                }
            }
        }
        if task.status == TaskStatus::Moved {
            if let Some(target) = &task.target {
                line.push_str(&format!(" → {target}"));
            }
        }
        if let Some(source) = &task.source {
            line.push_str(&format!(" (from {source})"));
        }
        line
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::parser::parse_document;

        #[test]
        fn round_trip_is_exact_without_comments() {
            let text = "morning notes\n\n- [ ] 📞 Call dentist\n- [ ] ~9:30 Standup\n- [x] 📧 Send invoice (14:05)\n- [x] Report (14:05 2026-08-25)\n- [-] Skip gym\n- [>] Buy milk → 2026-08-26\n- [ ] Buy milk (from 2026-08-25)\n\nevening notes";
            let doc = parse_document("today.md", text);
            assert_eq!(format_document(&doc), text);
        }

        #[test]
        fn formatting_is_idempotent() {
            let text = "- [ ] one\n> note\nprose\n- [x] two (10:00)";
            let doc = parse_document("today.md", text);
            let once = format_document(&doc);
            let twice = format_document(&parse_document("today.md", &once));
            assert_eq!(once, twice);
        }

        #[test]
        fn comments_round_trip_by_reparse_not_bytes() {
            let text = "- [ ] Call dentist\n> ask about Friday";
            let doc = parse_document("today.md", text);
            let formatted = format_document(&doc);
            // The quote prefix is normalized to four-space indentation.
            assert_eq!(formatted, "- [ ] Call dentist\n    ask about Friday");
            let reparsed = parse_document("today.md", &formatted);
            assert_eq!(reparsed.content, doc.content);
        }

        #[test]
        fn round_trip_keeps_coincidental_trailing_time() {
            // The description legitimately ends with the same text as the
            // stripped completion suffix; both must survive.
            let text = "- [x] Sync at noon (14:05) (14:05)";
            let doc = parse_document("today.md", text);
            let task = doc.tasks().next().unwrap();
            assert_eq!(task.description, "Sync at noon (14:05)");
            assert_eq!(task.time.completed.as_deref(), Some("14:05"));
            assert_eq!(format_document(&doc), text);
        }

        #[test]
        fn completion_suffix_not_duplicated() {
            let mut task = parse_document("today.md", "- [ ] Call dentist")
                .tasks()
                .next()
                .unwrap()
                .clone();
            task.complete(Some("15:00"));
            assert_eq!(render_task_line(&task), "- [x] Call dentist (15:00)");
        }
    }
}

pub mod lookup {
    //! Resolve free-text queries to tasks in three tiers, stopping at the
    //! first tier with any result: exact substring over descriptions, exact
    //! substring over original lines, then normalized substring over
    //! original lines.

    use crate::core::*;
    use unicode_normalization::UnicodeNormalization;

    /// NFD-decompose, drop everything non-alphanumeric (diacritic marks,
    /// punctuation, whitespace), lower-case. Normalization tolerates
    /// accents and punctuation, never missing letters.
    pub fn normalize_for_match(s: &str) -> String {
        s.nfd()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect()
    }

    /// Node indices of every task the query resolves to.
    pub fn find_task_indices(doc: &Document, query: &str) -> Vec<usize> {
        let task_nodes = || {
            doc.content
                .iter()
                .enumerate()
                .filter_map(|(i, n)| n.as_task().map(|t| (i, t)))
        };

        let exact: Vec<usize> = task_nodes()
            .filter(|(_, t)| t.description.contains(query))
            .map(|(i, _)| i)
            .collect();
        if !exact.is_empty() {
            return exact;
        }

        let raw: Vec<usize> = task_nodes()
            .filter(|(_, t)| t.original_line.contains(query))
            .map(|(i, _)| i)
            .collect();
        if !raw.is_empty() {
            return raw;
        }

        let needle = normalize_for_match(query);
        if needle.is_empty() {
            return Vec::new();
        }
        task_nodes()
            .filter(|(_, t)| normalize_for_match(&t.original_line).contains(&needle))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn find_tasks_by_description<'a>(doc: &'a Document, query: &str) -> Vec<&'a Task> {
        find_task_indices(doc, query)
            .into_iter()
            .filter_map(|i| doc.content[i].as_task())
            .collect()
    }

    /// Exactly-one resolution: zero matches is `NotFound`, several is
    /// `Ambiguous`; both carry the document path for diagnostics.
    pub fn find_task_index(doc: &Document, query: &str) -> EngineResult<usize> {
        let hits = find_task_indices(doc, query);
        match hits.len() {
            0 => Err(EngineError::NotFound {
                path: doc.path.clone(),
                query: query.to_string(),
            }),
            1 => Ok(hits[0]),
            count => Err(EngineError::Ambiguous {
                path: doc.path.clone(),
                query: query.to_string(),
                count,
            }),
        }
    }

    pub fn find_task_by_description<'a>(doc: &'a Document, query: &str) -> EngineResult<&'a Task> {
        let index = find_task_index(doc, query)?;
        match &doc.content[index] {
            Node::Task(task) => Ok(task),
            Node::Text(_) => unreachable!("find_task_index only returns task nodes"),
        }
    }

}

pub mod position {
    //! Canonical insertion indices and the sequence-level primitives. All
    //! mutating functions operate on a structural clone and return a new
    //! document.

    use crate::core::*;
    use crate::lookup;

    /// Index of the pending/processed boundary: newly processed items
    /// cluster right after the already-processed run, while prose attached
    /// to the pending section stays with it.
    pub fn find_current_spot(doc: &Document) -> usize {
        let Some(pending) = doc
            .content
            .iter()
            .position(|n| matches!(n.as_task(), Some(t) if t.status == TaskStatus::Pending))
        else {
            return doc.content.len();
        };
        if pending == 0 {
            return 0;
        }
        let Some(anchor) = doc.content[..pending].iter().rposition(Node::is_task) else {
            // Only leading prose before the first pending task; keep it
            // leading and insert directly before the task.
            return pending;
        };
        let mut index = anchor + 1;
        while index < pending && !doc.content[index].is_task() {
            index += 1;
        }
        index
    }

    /// Where to insert. The `After` payload is query text resolving to
    /// exactly one task; carrying it in the variant makes "after with no
    /// anchor text" unrepresentable.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum InsertPosition {
        Beginning,
        End,
        After(String),
    }

    pub fn determine_insertion_position(
        doc: &Document,
        position: &InsertPosition,
    ) -> EngineResult<usize> {
        match position {
            InsertPosition::Beginning => Ok(find_current_spot(doc)),
            InsertPosition::End => Ok(doc.content.len()),
            InsertPosition::After(query) => Ok(lookup::find_task_index(doc, query)? + 1),
        }
    }

    pub fn insert_task_at_position(
        doc: &Document,
        task: Task,
        index: usize,
    ) -> EngineResult<Document> {
        if index > doc.content.len() {
            return Err(EngineError::OutOfBounds {
                index,
                len: doc.content.len(),
            });
        }
        let mut out = doc.clone();
        out.content.insert(index, Node::Task(task));
        Ok(out)
    }

    /// Splice out the first node whose `(description, status)` pair equals
    /// the target's.
    pub fn remove_task_from_document(doc: &Document, task: &Task) -> EngineResult<Document> {
        let index = doc
            .content
            .iter()
            .position(|n| matches!(n.as_task(), Some(t) if t.matches_identity(task)))
            .ok_or_else(|| EngineError::NotFound {
                path: doc.path.clone(),
                query: task.description.clone(),
            })?;
        let mut out = doc.clone();
        out.content.remove(index);
        Ok(out)
    }

    /// Remove, then reinsert at an explicit index computed against the
    /// post-removal document.
    pub fn move_task_to_position(
        doc: &Document,
        task: &Task,
        index: usize,
    ) -> EngineResult<Document> {
        let removed = remove_task_from_document(doc, task)?;
        insert_task_at_position(&removed, task.clone(), index)
    }

    /// Remove, recompute the current spot on the post-removal document,
    /// reinsert there. Net effect: the task joins the processed cluster
    /// and everything else is untouched.
    pub fn move_task_to_current_spot(doc: &Document, task: &Task) -> EngineResult<Document> {
        let removed = remove_task_from_document(doc, task)?;
        let spot = find_current_spot(&removed);
        insert_task_at_position(&removed, task.clone(), spot)
    }

}

pub mod ops {
    //! Status transitions, comments, and the document-level wrappers that
    //! higher-level workflows go through. Wrappers validate the target's
    //! state first, then mutate a clone, so a failed call leaves the
    //! caller's document untouched.

    use crate::core::*;
    use crate::format::render_task_line;
    use crate::lookup;
    use crate::position::{self, InsertPosition};
    use log::debug;

    impl Task {
        /// Mark completed. When a time is supplied it is embedded in the
        /// description text and recorded in `time.completed`.
        pub fn complete(&mut self, time: Option<&str>) {
            self.status = TaskStatus::Completed;
            if let Some(time) = time {
                self.description.push_str(&format!(" ({time})"));
                self.time.completed = Some(time.to_string());
            }
        }

        /// Pure status change; no comment required by policy.
        pub fn abandon(&mut self) {
            self.status = TaskStatus::Abandoned;
        }

        pub fn mark_moved(&mut self, target: &str) {
            self.status = TaskStatus::Moved;
            self.target = Some(target.to_string());
        }

        /// Append one line to the comment block. Lines not already
        /// comment-prefixed are indented to four spaces; repeated calls
        /// accumulate into a single newline-joined block.
        pub fn append_comment_line(&mut self, line: &str) {
            let canonical = if line.starts_with("    ") || line.starts_with("> ") {
                line.to_string()
            } else {
                format!("    {line}")
            };
            if self.comment.is_empty() {
                self.comment = canonical;
            } else {
                self.comment.push('\n');
                self.comment.push_str(&canonical);
            }
        }
    }

    /// Companion entry for the destination of a move: same content, status
    /// reset to the prior pending/completed state, origin recorded.
    pub fn create_moved_task(task: &Task, source: &str) -> Task {
        let mut entry = task.clone();
        entry.status = match task.status {
            // A parsed moved line no longer carries the prior status; a
            // recorded completion time is the only evidence left.
            TaskStatus::Moved => {
                if task.time.completed.is_some() {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Pending
                }
            }
            status => status,
        };
        entry.target = None;
        entry.source = Some(source.to_string());
        entry
    }

    /* ------------------------- Document wrappers ------------------------- */

    fn expect_status(
        doc: &Document,
        index: usize,
        query: &str,
        expected: &'static str,
        allowed: &[TaskStatus],
    ) -> EngineResult<()> {
        let Some(task) = doc.content[index].as_task() else {
            unreachable!("lookup only yields task nodes");
        };
        if allowed.contains(&task.status) {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                path: doc.path.clone(),
                query: query.to_string(),
                actual: task.status,
                expected,
            })
        }
    }

    /// Check off the task the query resolves to, optionally stamping a
    /// completion time and appending a comment line.
    pub fn complete_task(
        doc: &Document,
        query: &str,
        time: Option<&str>,
        note: Option<&str>,
    ) -> EngineResult<Document> {
        let index = lookup::find_task_index(doc, query)?;
        expect_status(doc, index, query, "pending", &[TaskStatus::Pending])?;
        let mut out = doc.clone();
        if let Some(task) = out.content[index].as_task_mut() {
            task.complete(time);
            if let Some(note) = note {
                task.append_comment_line(note);
            }
            debug!("completed {:?} in {}", task.description, out.path);
        }
        Ok(out)
    }

    pub fn abandon_task(doc: &Document, query: &str) -> EngineResult<Document> {
        let index = lookup::find_task_index(doc, query)?;
        expect_status(doc, index, query, "pending", &[TaskStatus::Pending])?;
        let mut out = doc.clone();
        if let Some(task) = out.content[index].as_task_mut() {
            task.abandon();
            debug!("abandoned {:?} in {}", task.description, out.path);
        }
        Ok(out)
    }

    /// Parse `text` as a task line body and insert the new pending task at
    /// the resolved position. Annotations in the text (emoji, scheduled
    /// time) are extracted as usual.
    pub fn add_task(doc: &Document, text: &str, position: &InsertPosition) -> EngineResult<Document> {
        let index = position::determine_insertion_position(doc, position)?;
        let line = format!("- [ ] {text}");
        let task = crate::parser::parse_task_line(&line, 0).unwrap_or_else(|| Task::new(text.trim()));
        position::insert_task_at_position(doc, task, index)
    }

    /// Replace the resolved task in place with a removal-marker block
    /// carrying the task's canonical line, keeping an audit trail at the
    /// same sequence index.
    pub fn remove_task(doc: &Document, query: &str) -> EngineResult<Document> {
        let index = lookup::find_task_index(doc, query)?;
        let mut out = doc.clone();
        if let Some(task) = out.content[index].as_task() {
            // Prefer the source line verbatim; fall back to rendering for
            // tasks that never came from text.
            let line = if task.original_line.is_empty() {
                render_task_line(task)
            } else {
                task.original_line.clone()
            };
            let marker = TextBlock {
                content: format!("%% removed: {line} %%"),
                line_index: task.line_index,
            };
            debug!("removed {:?} from {}", task.description, out.path);
            out.content[index] = Node::Text(marker);
        }
        Ok(out)
    }

    /// Mark the resolved task as moved to `target` and return the
    /// companion entry to be placed in the destination note. The
    /// companion's `source` is this document's path.
    pub fn relocate_task(
        doc: &Document,
        query: &str,
        target: &str,
    ) -> EngineResult<(Document, Task)> {
        let index = lookup::find_task_index(doc, query)?;
        expect_status(
            doc,
            index,
            query,
            "pending or completed",
            &[TaskStatus::Pending, TaskStatus::Completed],
        )?;
        let mut out = doc.clone();
        let Some(task) = out.content[index].as_task_mut() else {
            unreachable!("lookup only yields task nodes");
        };
        let companion = create_moved_task(task, &doc.path);
        task.mark_moved(target);
        debug!("moved {:?} from {} to {target}", task.description, doc.path);
        Ok((out, companion))
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::format::format_document;
        use crate::parser::parse_document;
        use crate::position::move_task_to_current_spot;

        const TWO_TASKS: &str = "- [ ] 📞 Call dentist\n- [x] 📧 Send invoice (14:05)";

        #[test]
        fn completion_postcondition() {
            let doc = parse_document("today.md", TWO_TASKS);
            let done = complete_task(&doc, "Call dentist", Some("15:00"), None).unwrap();
            let task = done.tasks().next().unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
            assert!(task.description.ends_with("(15:00)"));
            assert_eq!(task.time.completed.as_deref(), Some("15:00"));
            // Caller's document is untouched.
            assert_eq!(doc.tasks().next().unwrap().status, TaskStatus::Pending);
        }

        #[test]
        fn complete_then_relocate_joins_processed_cluster() {
            let doc = parse_document("today.md", TWO_TASKS);
            let done = complete_task(&doc, "Call dentist", Some("15:00"), None).unwrap();
            let task = done.tasks().next().unwrap().clone();
            assert_eq!(task.description, "Call dentist (15:00)");
            assert_eq!(task.emoji, Some('📞'));

            let relocated = move_task_to_current_spot(&done, &task).unwrap();
            assert_eq!(
                format_document(&relocated),
                "- [x] 📧 Send invoice (14:05)\n- [x] 📞 Call dentist (15:00)"
            );
        }

        #[test]
        fn complete_requires_pending() {
            let doc = parse_document("today.md", TWO_TASKS);
            let err = complete_task(&doc, "Send invoice", Some("15:00"), None).unwrap_err();
            assert!(matches!(
                err,
                EngineError::InvalidState {
                    actual: TaskStatus::Completed,
                    expected: "pending",
                    ..
                }
            ));
        }

        #[test]
        fn completion_note_becomes_comment() {
            let doc = parse_document("today.md", TWO_TASKS);
            let done =
                complete_task(&doc, "Call dentist", None, Some("rescheduled to Friday")).unwrap();
            let task = done.tasks().next().unwrap();
            assert_eq!(task.comment, "    rescheduled to Friday");
            assert_eq!(task.time.completed, None);
        }

        #[test]
        fn abandon_is_a_pure_status_change() {
            let doc = parse_document("today.md", TWO_TASKS);
            let abandoned = abandon_task(&doc, "Call dentist").unwrap();
            let task = abandoned.tasks().next().unwrap();
            assert_eq!(task.status, TaskStatus::Abandoned);
            assert_eq!(task.description, "Call dentist");
            assert!(!task.has_comment());
        }

        #[test]
        fn add_task_extracts_annotations_and_positions() {
            let doc = parse_document("today.md", "- [x] done\n- [ ] next");
            let added = add_task(&doc, "🛒 Buy milk", &InsertPosition::Beginning).unwrap();
            let descriptions: Vec<_> = added.tasks().map(|t| t.description.as_str()).collect();
            assert_eq!(descriptions, vec!["done", "Buy milk", "next"]);
            assert_eq!(added.tasks().nth(1).unwrap().emoji, Some('🛒'));

            let after = add_task(&doc, "Call Bob", &InsertPosition::After("next".into())).unwrap();
            assert_eq!(after.tasks().last().unwrap().description, "Call Bob");
        }

        #[test]
        fn remove_leaves_marker_in_place() {
            let doc = parse_document("today.md", TWO_TASKS);
            let removed = remove_task(&doc, "Send invoice").unwrap();
            assert_eq!(removed.content.len(), 2);
            match &removed.content[1] {
                Node::Text(block) => {
                    assert_eq!(block.content, "%% removed: - [x] 📧 Send invoice (14:05) %%")
                }
                other => panic!("expected marker block, got {other:?}"),
            }
            // Re-parse keeps the marker as prose, not a comment on the
            // preceding task.
            let reparsed = parse_document("today.md", &format_document(&removed));
            assert_eq!(reparsed.tasks().count(), 1);
        }

        #[test]
        fn relocate_produces_companion_with_source() {
            let doc = parse_document("today.md", TWO_TASKS);
            let (updated, companion) = relocate_task(&doc, "Call dentist", "2026-08-26").unwrap();
            let moved = updated.tasks().next().unwrap();
            assert_eq!(moved.status, TaskStatus::Moved);
            assert_eq!(moved.target.as_deref(), Some("2026-08-26"));

            assert_eq!(companion.status, TaskStatus::Pending);
            assert_eq!(companion.source.as_deref(), Some("today.md"));
            assert_eq!(companion.target, None);

            // A completed task keeps its completed state at the
            // destination.
            let (_, done_companion) = relocate_task(&doc, "Send invoice", "archive").unwrap();
            assert_eq!(done_companion.status, TaskStatus::Completed);
        }

        #[test]
        fn companion_keeps_completed_status_without_a_time() {
            // A completed line need not record a completion time; the
            // companion still arrives completed.
            let doc = parse_document("today.md", "- [x] Walk dog");
            let (_, companion) = relocate_task(&doc, "Walk dog", "archive").unwrap();
            assert_eq!(companion.status, TaskStatus::Completed);
            assert_eq!(companion.time.completed, None);
        }

        #[test]
        fn remove_marker_preserves_the_source_line() {
            let doc = parse_document("today.md", "- [x]  Spaced   out");
            let removed = remove_task(&doc, "Spaced").unwrap();
            match &removed.content[0] {
                Node::Text(block) => {
                    assert_eq!(block.content, "%% removed: - [x]  Spaced   out %%")
                }
                other => panic!("expected marker block, got {other:?}"),
            }
        }

        #[test]
        fn relocate_rejects_abandoned_tasks() {
            let doc = parse_document("today.md", "- [-] dropped");
            assert!(matches!(
                relocate_task(&doc, "dropped", "anywhere"),
                Err(EngineError::InvalidState { .. })
            ));
        }

        #[test]
        fn comment_lines_accumulate() {
            let mut task = Task::new("call");
            task.append_comment_line("first");
            task.append_comment_line("> quoted");
            task.append_comment_line("    already indented");
            assert_eq!(task.comment, "    first\n> quoted\n    already indented");
        }
    }
}

pub mod validate {
    //! Batch validation: resolve every query and check required states
    //! before any mutation runs. Any failure rejects the whole batch with
    //! one aggregated report, so multi-item operations are all-or-nothing.

    use crate::core::*;
    use crate::lookup;

    pub type StatusPredicate = fn(TaskStatus) -> bool;

    #[derive(Debug, Clone)]
    pub struct ValidationItem {
        pub query: String,
        pub required: Option<StatusPredicate>,
    }

    impl ValidationItem {
        pub fn new(query: impl Into<String>) -> Self {
            Self {
                query: query.into(),
                required: None,
            }
        }

        pub fn requiring(query: impl Into<String>, predicate: StatusPredicate) -> Self {
            Self {
                query: query.into(),
                required: Some(predicate),
            }
        }
    }

    /// Resolve all items, collecting unresolved queries (no match or
    /// ambiguous) and wrong-state queries separately. Returns the resolved
    /// tasks in item order, or one `Validation` error enumerating every
    /// offending item.
    pub fn validate_tasks<'a>(
        doc: &'a Document,
        items: &[ValidationItem],
    ) -> EngineResult<Vec<&'a Task>> {
        let mut unresolved = Vec::new();
        let mut wrong_state = Vec::new();
        let mut resolved = Vec::new();

        for item in items {
            match lookup::find_task_by_description(doc, &item.query) {
                Ok(task) => match item.required {
                    Some(predicate) if !predicate(task.status) => {
                        wrong_state.push((item.query.clone(), task.status));
                    }
                    _ => resolved.push(task),
                },
                Err(EngineError::NotFound { .. }) | Err(EngineError::Ambiguous { .. }) => {
                    unresolved.push(item.query.clone());
                }
                Err(other) => return Err(other),
            }
        }

        if unresolved.is_empty() && wrong_state.is_empty() {
            Ok(resolved)
        } else {
            Err(EngineError::Validation(ValidationFailure {
                path: doc.path.clone(),
                unresolved,
                wrong_state,
            }))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::parser::parse_document;

        #[test]
        fn aggregates_every_failure_into_one_error() {
            let doc = parse_document("today.md", "- [x] wrongStatus");
            let items = [
                ValidationItem::new("missing"),
                ValidationItem::requiring("wrongStatus", |s| s == TaskStatus::Pending),
            ];
            let err = validate_tasks(&doc, &items).unwrap_err();
            let message = err.to_string();
            assert!(message.contains("missing"));
            assert!(message.contains("wrongStatus"));
            match err {
                EngineError::Validation(failure) => {
                    assert_eq!(failure.unresolved, vec!["missing".to_string()]);
                    assert_eq!(
                        failure.wrong_state,
                        vec![("wrongStatus".to_string(), TaskStatus::Completed)]
                    );
                }
                other => panic!("expected validation error, got {other}"),
            }
        }

        #[test]
        fn resolves_in_item_order_when_all_pass() {
            let doc = parse_document("today.md", "- [ ] alpha\n- [x] beta");
            let items = [
                ValidationItem::requiring("beta", |s| s == TaskStatus::Completed),
                ValidationItem::new("alpha"),
            ];
            let tasks = validate_tasks(&doc, &items).unwrap();
            let names: Vec<_> = tasks.iter().map(|t| t.description.as_str()).collect();
            assert_eq!(names, vec!["beta", "alpha"]);
        }

        #[test]
        fn ambiguous_queries_count_as_unresolved() {
            let doc = parse_document("today.md", "- [ ] write a\n- [ ] write b");
            let err = validate_tasks(&doc, &[ValidationItem::new("write")]).unwrap_err();
            match err {
                EngineError::Validation(failure) => {
                    assert_eq!(failure.unresolved, vec!["write".to_string()]);
                }
                other => panic!("expected validation error, got {other}"),
            }
        }
    }
}

pub use self::core::{Document, EngineError, EngineResult, Node, Task, TaskStatus};
pub use self::format::format_document;
pub use self::parser::parse_document;
