//! Corpus loading and the binary data block format.
//!
//! A block is `num_docs:i32` followed, per document, by `N:i32` and N
//! `(word:i32, topic:i32)` pairs, all little-endian.

use std::collections::{BTreeSet, HashMap};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::document::{Document, Token};
use crate::error::{LdaError, Result};

/// Lengths read from a block are not trusted for preallocation beyond this.
const PREALLOC_LIMIT: usize = 1 << 16;

/// Word id to occurrence count for one document.
pub type Bag = HashMap<u32, usize>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataBlock {
    docs: Vec<Document>,
}

impl DataBlock {
    pub fn new(docs: Vec<Document>) -> DataBlock {
        DataBlock { docs }
    }

    /// Turn bags into documents with uniformly random initial topics.
    pub fn from_bags<R: Rng>(bags: &[Bag], num_topics: usize, rng: &mut R) -> DataBlock {
        let docs = bags
            .iter()
            .map(|bag| {
                let mut words: Vec<(u32, usize)> = bag.iter().map(|(&w, &c)| (w, c)).collect();
                words.sort();
                Document::with_random_topics(&words, num_topics, rng)
            })
            .collect();
        DataBlock { docs }
    }

    pub fn documents(&self) -> &[Document] {
        &self.docs
    }

    pub fn documents_mut(&mut self) -> &mut [Document] {
        &mut self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn num_tokens(&self) -> usize {
        self.docs.iter().map(|d| d.len()).sum()
    }

    /// One past the largest word id in the block.
    pub fn num_vocabs(&self) -> usize {
        self.docs
            .iter()
            .flat_map(|d| d.tokens())
            .map(|t| t.word as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Reject word ids outside `[0, num_vocabs)` and topics outside `[0, num_topics)`.
    pub fn validate(&self, num_vocabs: usize, num_topics: usize) -> Result<()> {
        for token in self.docs.iter().flat_map(|d| d.tokens()) {
            if token.word as usize >= num_vocabs {
                return Err(LdaError::WordOutOfRange { word: token.word as i64, num_vocabs });
            }
            if token.topic as usize >= num_topics {
                return Err(LdaError::TopicOutOfRange { topic: token.topic as i64, num_topics });
            }
        }
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<DataBlock> {
        let file = File::open(path)?;
        DataBlock::read_from(BufReader::new(file))
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<DataBlock> {
        let num_docs = read_len(&mut reader, "document count")?;
        let mut docs = Vec::with_capacity(num_docs.min(PREALLOC_LIMIT));
        for d in 0..num_docs {
            let num_tokens = read_len(&mut reader, "token count")?;
            let mut tokens = Vec::with_capacity(num_tokens.min(PREALLOC_LIMIT));
            for _ in 0..num_tokens {
                let word = read_i32(&mut reader)?;
                let topic = read_i32(&mut reader)?;
                if word < 0 || topic < 0 {
                    return Err(LdaError::Format(format!(
                        "negative id in document {}: word = {}, topic = {}",
                        d, word, topic
                    )));
                }
                tokens.push(Token { word: word as u32, topic: topic as u32 });
            }
            // Blocks are stored sorted; slice sweeps depend on it.
            if let Some(i) = tokens.windows(2).position(|w| w[0].word > w[1].word) {
                return Err(LdaError::Format(format!(
                    "document {} is not sorted by word id at token {}: {} > {}",
                    d,
                    i + 1,
                    tokens[i].word,
                    tokens[i + 1].word
                )));
            }
            docs.push(Document::new(tokens));
        }
        let mut rest = [0u8; 1];
        if reader.read(&mut rest)? != 0 {
            return Err(LdaError::Format("trailing bytes after last document".into()));
        }
        Ok(DataBlock { docs })
    }

    /// Write through a temporary file that is renamed into place.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let tmp = temp_path(path);
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            self.write_to(&mut writer)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_len(writer, self.docs.len())?;
        for doc in &self.docs {
            write_len(writer, doc.len())?;
            for token in doc.tokens() {
                writer.write_all(&(token.word as i32).to_le_bytes())?;
                writer.write_all(&(token.topic as i32).to_le_bytes())?;
            }
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(i32::from_le_bytes(buf)),
        Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(LdaError::Format("unexpected end of block".into())),
        Err(e) => Err(e.into()),
    }
}

fn read_len<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let n = read_i32(reader)?;
    if n < 0 {
        return Err(LdaError::Format(format!("negative {}: {}", what, n)));
    }
    Ok(n as usize)
}

fn write_len<W: Write>(writer: &mut W, n: usize) -> Result<()> {
    if n > i32::max_value() as usize {
        return Err(LdaError::Format(format!("length {} does not fit in an i32", n)));
    }
    writer.write_all(&(n as i32).to_le_bytes())?;
    Ok(())
}

/// Parse one line of the libsvm format, `label word:count word:count ...`.
pub fn parse_bag(line: &str, line_no: usize) -> Result<Bag> {
    let parse_error = |message: String| LdaError::Parse { line: line_no, message };
    let mut bag = Bag::new();
    // The leading label is ignored.
    for elm in line.split_whitespace().skip(1) {
        let mut iter = elm.split(':');
        let (word, count) = match (iter.next(), iter.next(), iter.next()) {
            (Some(w), Some(c), None) => (w, c),
            _ => return Err(parse_error(format!("expected word:count, found {:?}", elm))),
        };
        let word = word
            .parse::<u32>()
            .map_err(|e| parse_error(format!("bad word id {:?}: {}", word, e)))?;
        let count = count
            .parse::<usize>()
            .map_err(|e| parse_error(format!("bad count {:?}: {}", count, e)))?;
        if count > 0 {
            *bag.entry(word).or_insert(0) += count;
        }
    }
    Ok(bag)
}

/// Load a libsvm corpus, one document per line. Empty documents are skipped.
pub fn load_bags<P: AsRef<Path>>(path: P) -> Result<Vec<Bag>> {
    let file = BufReader::new(File::open(path)?);
    let mut bags = Vec::new();
    for (i, line) in file.lines().enumerate() {
        let bag = parse_bag(&line?, i + 1)?;
        if !bag.is_empty() {
            bags.push(bag);
        }
    }
    Ok(bags)
}

pub fn load_text_vocabulary<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let file = BufReader::new(File::open(path)?);
    let vocab = file.lines().collect::<io::Result<Vec<String>>>()?;
    Ok(vocab)
}

/// Renumber word ids to `0..n` in their original order. Returns the new
/// bags, `n`, and the original id of every new id.
pub fn compact_words(bags: Vec<Bag>) -> (Vec<Bag>, usize, Vec<u32>) {
    let original: BTreeSet<u32> = bags.iter().flat_map(|bag| bag.keys().cloned()).collect();
    let original: Vec<u32> = original.into_iter().collect();
    let compacted = bags
        .into_iter()
        .map(|bag| {
            bag.into_iter()
                .filter_map(|(w, c)| original.binary_search(&w).ok().map(|i| (i as u32, c)))
                .collect()
        })
        .collect();
    (compacted, original.len(), original)
}

/// Map compacted ids back through `original`. Returns the bags and one past
/// the largest restored id.
pub fn decompact_words(bags: Vec<Bag>, original: &[u32]) -> (Vec<Bag>, usize) {
    let restored: Vec<Bag> = bags
        .into_iter()
        .map(|bag| bag.into_iter().map(|(w, c)| (original[w as usize], c)).collect())
        .collect();
    let vocab_size = restored
        .iter()
        .flat_map(|bag| bag.keys())
        .map(|&w| w as usize + 1)
        .max()
        .unwrap_or(0);
    (restored, vocab_size)
}
