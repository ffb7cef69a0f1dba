use std::fs::File;
use std::io::{Read, Seek};
use std::path::PathBuf;

use encoding_rs::Encoding;
use rand::Rng;
use thiserror::Error;
use zip::ZipArchive;

use crate::quiz::QuestionBank;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read the corpus: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed corpus archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("corpus archive has no text members")]
    EmptyArchive,

    #[error("member '{member}' is not valid {encoding}")]
    Decode { member: String, encoding: &'static str },
}

impl ParseError {
    /// Only plain I/O failures are worth another attempt, a broken archive
    /// stays broken.
    pub fn is_transient(&self) -> bool {
        matches!(self, ParseError::Io(_))
    }
}

/// Anything that can produce a fresh bank of questions.
pub trait QuestionSource: Send + Sync {
    fn load(&self) -> Result<QuestionBank, ParseError>;
}

/// Literal tokens that open question and answer blocks in the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub question: String,
    pub answer: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            question: "Вопрос".to_string(),
            answer: "Ответ".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemberSelection {
    /// One member picked uniformly at random per load
    #[default]
    Random,
    /// Every member merged into one bank
    All,
}

enum Block {
    Between,
    Question(Vec<String>),
    // Answer marker seen with nothing after it, the answer is on a later line
    PendingAnswer(String),
}

/// Segments a stream of corpus lines into a question bank.
///
/// A block starts at a line beginning with the question marker and ends at
/// a line beginning with the answer marker. Lines starting with `[` inside
/// a question are annotations and are dropped. Answer markers without an
/// open question are ignored.
pub fn parse_lines<I, S>(lines: I, markers: &Markers) -> QuestionBank
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut bank = QuestionBank::new();
    let mut block = Block::Between;

    for line in lines {
        let line = line.as_ref().trim_end_matches(['\r', '\n']);

        if let Some(rest) = line.strip_prefix(markers.answer.as_str()) {
            let question = match std::mem::replace(&mut block, Block::Between) {
                Block::Question(parts) => {
                    let joined = parts.join(" ").trim().to_string();
                    (!joined.is_empty()).then_some(joined)
                }
                _ => None,
            };
            let remainder = rest.trim_start().trim_start_matches(':').trim();

            match question {
                Some(question) if !remainder.is_empty() => {
                    bank.insert(question, remainder.to_string());
                }
                Some(question) => block = Block::PendingAnswer(question),
                None => log::debug!("Dropping answer without a question: {:?}", remainder),
            }
            continue;
        }

        match &mut block {
            Block::Question(parts) => {
                if line.starts_with('[') || line.trim().is_empty() {
                    continue;
                }
                parts.push(line.trim_end().to_string());
            }
            Block::PendingAnswer(_) if line.starts_with(markers.question.as_str()) => {
                block = Block::Question(Vec::new());
            }
            Block::PendingAnswer(_) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Block::PendingAnswer(question) =
                    std::mem::replace(&mut block, Block::Between)
                {
                    bank.insert(question, line.trim().to_string());
                }
            }
            Block::Between => {
                if line.starts_with(markers.question.as_str()) {
                    block = Block::Question(Vec::new());
                }
            }
        }
    }

    bank
}

/// Reads a zip corpus and parses one or all of its members.
pub fn parse_archive<R, G>(
    reader: R,
    selection: MemberSelection,
    encoding: &'static Encoding,
    markers: &Markers,
    rng: &mut G,
) -> Result<QuestionBank, ParseError>
where
    R: Read + Seek,
    G: Rng + ?Sized,
{
    let mut archive = ZipArchive::new(reader)?;

    let mut members = Vec::new();
    for index in 0..archive.len() {
        if !archive.by_index(index)?.is_dir() {
            members.push(index);
        }
    }
    if members.is_empty() {
        return Err(ParseError::EmptyArchive);
    }

    let chosen = match selection {
        MemberSelection::Random => vec![members[rng.gen_range(0..members.len())]],
        MemberSelection::All => members,
    };

    let mut bank = QuestionBank::new();
    for index in chosen {
        let mut member = archive.by_index(index)?;
        let name = member.name().to_string();
        let mut bytes = Vec::new();
        member.read_to_end(&mut bytes)?;

        let (text, had_errors) = encoding.decode_without_bom_handling(&bytes);
        if had_errors {
            return Err(ParseError::Decode {
                member: name,
                encoding: encoding.name(),
            });
        }

        let parsed = parse_lines(text.lines(), markers);
        log::debug!("Member '{}' gave {} questions", name, parsed.len());
        bank.extend(parsed);
    }

    Ok(bank)
}

/// A zip corpus on disk, reopened on every load.
pub struct ArchiveSource {
    path: PathBuf,
    encoding: &'static Encoding,
    selection: MemberSelection,
    markers: Markers,
}

impl ArchiveSource {
    pub fn new(
        path: impl Into<PathBuf>,
        encoding: &'static Encoding,
        selection: MemberSelection,
        markers: Markers,
    ) -> Self {
        Self {
            path: path.into(),
            encoding,
            selection,
            markers,
        }
    }
}

impl QuestionSource for ArchiveSource {
    fn load(&self) -> Result<QuestionBank, ParseError> {
        let file = File::open(&self.path)?;
        let bank = parse_archive(
            file,
            self.selection,
            self.encoding,
            &self.markers,
            &mut rand::thread_rng(),
        )?;
        log::info!(
            "Loaded {} questions from '{}'",
            bank.len(),
            self.path.display()
        );
        Ok(bank)
    }
}
