use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use phylotree::tree::Tree as PhyloTree;
use tracing::debug;

use crate::error::ReadError;
use crate::taxa::{BoundTree, TaxonUniverse};
use crate::validator::ValidationReport;

/// Trees of one file, in file order, bound to the file's taxon universe.
#[derive(Debug)]
pub struct TreeCollection {
    pub universe: Arc<TaxonUniverse>,
    pub trees: Vec<BoundTree>,
}

impl TreeCollection {
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.trees.iter().map(|t| t.name.clone()).collect()
    }
}

/// Read a NEXUS tree-list file. Paths ending in `.gz` are decompressed.
pub fn read_nexus_trees<P: AsRef<Path>>(path: P) -> Result<TreeCollection, ReadError> {
    let path = path.as_ref();
    let io_err = |source: io::Error| ReadError::Io { path: path.to_path_buf(), source };

    let file = File::open(path).map_err(io_err)?;
    let mut content = String::new();
    if path.to_string_lossy().ends_with(".gz") {
        GzDecoder::new(file).read_to_string(&mut content).map_err(io_err)?;
    } else {
        io::BufReader::new(file).read_to_string(&mut content).map_err(io_err)?;
    }

    let collection = parse_nexus_trees(&content)?;
    debug!(path = %path.display(), trees = collection.len(), taxa = collection.universe.len(), "read tree file");
    Ok(collection)
}

/// Parse the TREES block of a NEXUS document.
///
/// The universe is the TAXLABELS list when the document has one, otherwise
/// the union of all leaf labels. A TRANSLATE table is applied to leaf names.
pub fn parse_nexus_trees(content: &str) -> Result<TreeCollection, ReadError> {
    let translate = parse_translate_block(content);

    let mut parsed = Vec::new();
    for block in collect_tree_blocks(content) {
        let newick = strip_comments_and_whitespace(block.body);
        let mut tree = PhyloTree::from_newick(&newick).map_err(|e| ReadError::Newick {
            name: block.name.to_string(),
            message: e.to_string(),
        })?;
        normalize_leaf_names(&mut tree, &translate);
        parsed.push((block.name.to_string(), tree));
    }

    let universe = match parse_taxlabels(content) {
        Some(labels) => TaxonUniverse::from_labels(labels)?,
        None => {
            let labels: BTreeSet<String> = parsed
                .iter()
                .flat_map(|(_, tree)| leaf_names(tree))
                .collect();
            TaxonUniverse::from_labels(labels)?
        }
    };
    let universe = Arc::new(universe);

    let trees = parsed
        .into_iter()
        .map(|(name, tree)| BoundTree::new(name, tree, Arc::clone(&universe)))
        .collect();

    Ok(TreeCollection { universe, trees })
}

struct TreeBlock<'a> { name: &'a str, body: &'a str }

fn collect_tree_blocks(content: &str) -> Vec<TreeBlock<'_>> {
    content
        .lines()
        .map(str::trim)
        .skip_while(|line| !is_keyword(line, "TREE"))
        .take_while(|line| !line.to_ascii_uppercase().starts_with("END;"))
        .filter(|line| is_keyword(line, "TREE"))
        .filter_map(|line| {
            // TREE [*] name = newick;
            let (header, body) = line.split_once('=')?;
            let name = header[4..].trim().trim_start_matches('*').trim();
            Some(TreeBlock { name, body: body.trim() })
        })
        .collect()
}

fn is_keyword(line: &str, keyword: &str) -> bool {
    line.get(..keyword.len()).is_some_and(|head| head.eq_ignore_ascii_case(keyword))
        && line
            .get(keyword.len()..)
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_whitespace() || c == '*'))
}

/// Remove NEXUS comments (`[...]`, including `[&R]` rooting tokens and BEAST
/// annotations) and whitespace outside quoted labels.
fn strip_comments_and_whitespace(newick: &str) -> String {
    let mut result = String::with_capacity(newick.len());
    let mut comment_depth = 0usize;
    let mut in_quotes = false;

    for ch in newick.chars() {
        match ch {
            '[' if !in_quotes => comment_depth += 1,
            ']' if !in_quotes && comment_depth > 0 => comment_depth -= 1,
            _ if comment_depth > 0 => {}
            '\'' => {
                in_quotes = !in_quotes;
                result.push(ch);
            }
            c if c.is_whitespace() && !in_quotes => {}
            c => result.push(c),
        }
    }

    result
}

/// Lexical unit of a NEXUS command. Quotes are resolved, comments dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Comma,
    Semicolon,
}

impl Token {
    fn into_word(self) -> Option<String> {
        match self {
            Token::Word(word) => Some(word),
            _ => None,
        }
    }
}

struct Tokens<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Tokens { chars: text.chars().peekable() }
    }

    fn skip_comment(&mut self) {
        let mut depth = 0usize;
        for ch in self.chars.by_ref() {
            match ch {
                '[' => depth += 1,
                ']' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    // 'It''s' reads as It's
    fn quoted(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.chars.next() {
            if ch == '\'' && self.chars.next_if_eq(&'\'').is_none() {
                break;
            }
            word.push(ch);
        }
        word
    }

    fn bare(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self
            .chars
            .next_if(|&c| !c.is_whitespace() && !matches!(c, '[' | ',' | ';' | '\''))
        {
            word.push(ch);
        }
        word
    }
}

impl Iterator for Tokens<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            let ch = *self.chars.peek()?;
            match ch {
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '[' => self.skip_comment(),
                ',' => {
                    self.chars.next();
                    return Some(Token::Comma);
                }
                ';' => {
                    self.chars.next();
                    return Some(Token::Semicolon);
                }
                '\'' => {
                    self.chars.next();
                    return Some(Token::Word(self.quoted()));
                }
                _ => return Some(Token::Word(self.bare())),
            }
        }
    }
}

/// One `NAME args... ;` statement and the block it appears in (both upper case).
#[derive(Debug)]
struct Command {
    block: Option<String>,
    name: String,
    args: Vec<Token>,
}

impl Command {
    fn in_block(&self, block: &str) -> bool {
        self.block.as_deref() == Some(block)
    }
}

/// Commands of a NEXUS document in order. BEGIN and END only switch blocks.
fn commands(content: &str) -> impl Iterator<Item = Command> + '_ {
    let mut tokens = Tokens::new(content);
    let mut block: Option<String> = None;

    std::iter::from_fn(move || loop {
        let name = match tokens.next()? {
            Token::Word(word) if word.eq_ignore_ascii_case("#NEXUS") => continue,
            Token::Word(word) => word.to_ascii_uppercase(),
            Token::Comma | Token::Semicolon => continue,
        };
        let args: Vec<Token> = tokens.by_ref().take_while(|t| *t != Token::Semicolon).collect();

        match name.as_str() {
            "BEGIN" => {
                block = args.into_iter().next().and_then(Token::into_word).map(|w| w.to_ascii_uppercase());
            }
            "END" | "ENDBLOCK" => block = None,
            _ => return Some(Command { block: block.clone(), name, args }),
        }
    })
}

// STRUCTURE:
// BEGIN TREES;
//     TRANSLATE
//         1 'Homo sapiens',
//         2 Pan,
//         3 Gorilla;
//     TREE ...
fn parse_translate_block(content: &str) -> HashMap<String, String> {
    // TRANSLATE comes before the first TREE command of the TREES block
    let Some(command) = commands(content)
        .skip_while(|c| !c.in_block("TREES"))
        .take_while(|c| c.in_block("TREES") && c.name != "TREE")
        .find(|c| c.name == "TRANSLATE")
    else {
        return HashMap::new();
    };

    command
        .args
        .split(|t| *t == Token::Comma)
        .filter_map(|entry| match entry {
            [Token::Word(id), Token::Word(label), ..] => Some((id.clone(), label.clone())),
            _ => None,
        })
        .collect()
}

/// Labels of the TAXLABELS command inside the TAXA block, if any.
fn parse_taxlabels(content: &str) -> Option<Vec<String>> {
    let command = commands(content)
        .take_while(|c| !c.in_block("TREES"))
        .find(|c| c.in_block("TAXA") && c.name == "TAXLABELS")?;

    Some(command.args.into_iter().filter_map(Token::into_word).collect())
}

fn normalize_leaf_names(tree: &mut PhyloTree, translate: &HashMap<String, String>) {
    for leaf_id in tree.get_leaves() {
        if let Ok(node) = tree.get_mut(&leaf_id) {
            node.name = node.name.as_ref().map(|name| {
                let name = name.trim_matches('\'');
                translate.get(name).cloned().unwrap_or_else(|| name.to_string())
            });
        }
    }
}

fn leaf_names(tree: &PhyloTree) -> Vec<String> {
    tree.get_leaves()
        .iter()
        .filter_map(|id| tree.get(id).ok()?.name.clone())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Write every duplicate pair of `report` as TSV to a file or stdout.
/// If `path` ends with `.gz`, the output is gzip-compressed.
/// If `path` equals `-`, the table is written to stdout (uncompressed).
pub fn write_report_tsv<P: AsRef<Path>>(
    path: P,
    names: &[String],
    report: &ValidationReport,
) -> io::Result<()> {
    let p = path.as_ref();
    let is_gz = p.to_string_lossy().ends_with(".gz");

    let mut out: Box<dyn Write> = if p.as_os_str() == "-" {
        Box::new(BufWriter::new(io::stdout().lock()))
    } else if is_gz {
        let f = File::create(p)?;
        let enc = GzEncoder::new(f, Compression::default());
        Box::new(BufWriter::new(enc))
    } else {
        Box::new(BufWriter::new(File::create(p)?))
    };

    let name = |idx: usize| names.get(idx).map(String::as_str).unwrap_or("?");

    writeln!(&mut out, "group\tfirst\tsecond\tfirst_name\tsecond_name")?;
    for (group_idx, group) in report.duplicate_groups.iter().enumerate() {
        for (a, b) in group.pairs() {
            writeln!(&mut out, "{group_idx}\t{a}\t{b}\t{}\t{}", name(a), name(b))?;
        }
    }

    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::validate;
    use std::path::PathBuf;

    const GENERATED_N3: &str = "#NEXUS

BEGIN TREES;

[! Generated by generate-tests.js for n=3 on Mon Jan 01 2024 ]

  TREE T0 = ((A, B), C);
  TREE T1 = ((A, C), B);
  TREE T2 = (A, (B, C));
  TREE T3 = (A, B, C);

END;
";

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("data").join(name)
    }

    #[test]
    fn test_parse_generator_output() {
        let collection = parse_nexus_trees(GENERATED_N3).unwrap();
        assert_eq!(collection.names(), ["T0", "T1", "T2", "T3"]);
        assert_eq!(collection.universe.labels(), ["A", "B", "C"]);

        let report = validate(&collection.trees, &collection.universe).unwrap();
        assert_eq!(report.bifurcating_count, 3);
        assert_eq!(report.multifurcating_count, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn test_strip_comments_and_whitespace() {
        assert_eq!(strip_comments_and_whitespace("[&R] ((A, B), C);"), "((A,B),C);");
        assert_eq!(
            strip_comments_and_whitespace("((A:[&rate=0.1]1.0,B:2.0),'Homo sapiens');"),
            "((A:1.0,B:2.0),'Homo sapiens');"
        );
    }

    #[test]
    fn test_translate_block() {
        let content = "#NEXUS
BEGIN TREES;
    TRANSLATE
        1 Alpha,
        2 Beta,
        3 Gamma;
    TREE first = ((1,2),3);
    tree second = (1,(3,2));
END;
";
        let collection = parse_nexus_trees(content).unwrap();
        assert_eq!(collection.universe.labels(), ["Alpha", "Beta", "Gamma"]);
        assert_eq!(collection.names(), ["first", "second"]);

        let report = validate(&collection.trees, &collection.universe).unwrap();
        assert!(report.rejected.is_empty());
        assert!(report.duplicate_groups.is_empty());
    }

    #[test]
    fn test_taxlabels_define_the_universe() {
        let content = "#NEXUS
BEGIN TAXA;
    DIMENSIONS NTAX=4;
    TAXLABELS A B C D;
END;
BEGIN TREES;
    TREE * T0 = ((A,B),(C,D));
    TREE T1 = ((A,B),C);
END;
";
        let collection = parse_nexus_trees(content).unwrap();
        assert_eq!(collection.universe.len(), 4);
        assert_eq!(collection.names(), ["T0", "T1"]);

        let report = validate(&collection.trees, &collection.universe).unwrap();
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].index, 1);
        assert!(report.leaf_count_anomaly.is_some());
    }

    #[test]
    fn test_non_ascii_labels() {
        let content = "#NEXUS
BEGIN TAXA;
    TAXLABELS
    Bäär
    B
    C;
END;
BEGIN TREES;
    TREE T0 = ((Bäär,B),C);
    TREE Tö = ((B,C),Bäär);
END;
";
        let collection = parse_nexus_trees(content).unwrap();
        assert_eq!(collection.universe.labels(), ["B", "Bäär", "C"]);
        assert_eq!(collection.names(), ["T0", "Tö"]);

        let report = validate(&collection.trees, &collection.universe).unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn test_keyword_needs_char_boundary() {
        assert!(is_keyword("TREE t = (A,B);", "TREE"));
        assert!(is_keyword("tree* t = (A,B);", "TREE"));
        assert!(!is_keyword("TREES;", "TREE"));
        assert!(!is_keyword("Bäär", "TREE"));
        assert!(!is_keyword("ä", "TREE"));
    }

    #[test]
    fn test_quoted_labels_keep_spaces() {
        let content = "#NEXUS
BEGIN TAXA;
    TAXLABELS 'Homo sapiens' 'Pan troglodytes' Gorilla 'O''Brien';
END;
BEGIN TREES;
    TRANSLATE 1 'Homo sapiens', 2 'Pan troglodytes',
        3 Gorilla, 4 'O''Brien';
    TREE T0 = ((1,2),(3,4));
END;
";
        assert_eq!(
            parse_taxlabels(content).unwrap(),
            ["Homo sapiens", "Pan troglodytes", "Gorilla", "O'Brien"]
        );

        let translate = parse_translate_block(content);
        assert_eq!(translate.len(), 4);
        assert_eq!(translate["1"], "Homo sapiens");
        assert_eq!(translate["2"], "Pan troglodytes");
        assert_eq!(translate["4"], "O'Brien");

        let collection = parse_nexus_trees(content).unwrap();
        let report = validate(&collection.trees, &collection.universe).unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn test_taxlabels_only_from_taxa_block() {
        let content = "#NEXUS
[ TAXLABELS X Y Z; ]
BEGIN TREES;
    TREE TAXLABELS = ((A,B),C);
END;
";
        assert_eq!(parse_taxlabels(content), None);
        let collection = parse_nexus_trees(content).unwrap();
        assert_eq!(collection.universe.labels(), ["A", "B", "C"]);
        assert_eq!(collection.names(), ["TAXLABELS"]);
    }

    #[test]
    fn test_unparseable_newick() {
        let content = "#NEXUS
BEGIN TREES;
    TREE good = ((A,B),C);
    TREE broken = ((A,B),C;
END;
";
        let err = parse_nexus_trees(content).unwrap_err();
        match err {
            ReadError::Newick { name, .. } => assert_eq!(name, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_read_fixture_with_duplicates() {
        let collection = read_nexus_trees(fixture("n4_binary.nex")).unwrap();
        assert_eq!(collection.len(), 17);

        let report = validate(&collection.trees, &collection.universe).unwrap();
        assert_eq!(report.bifurcating_count, 17);
        assert_eq!(report.duplicate_groups.len(), 1);
        assert_eq!(report.duplicate_groups[0].members(), [0, 15, 16]);
    }

    #[test]
    fn test_read_gzip_fixture() {
        let plain = read_nexus_trees(fixture("n4_binary.nex")).unwrap();
        let gz = read_nexus_trees(fixture("n4_binary.nex.gz")).unwrap();
        assert_eq!(plain.names(), gz.names());
        assert_eq!(plain.universe, gz.universe);
    }

    #[test]
    fn test_missing_file() {
        let err = read_nexus_trees(fixture("does_not_exist.nex")).unwrap_err();
        assert!(matches!(err, ReadError::Io { .. }));
    }

    #[test]
    fn test_write_report_tsv() {
        let collection = read_nexus_trees(fixture("n4_binary.nex")).unwrap();
        let report = validate(&collection.trees, &collection.universe).unwrap();

        let out = std::env::temp_dir().join(format!("topology_report_{}.tsv", std::process::id()));
        write_report_tsv(&out, &collection.names(), &report).unwrap();
        let written = std::fs::read_to_string(&out).unwrap();
        std::fs::remove_file(&out).unwrap();

        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "group\tfirst\tsecond\tfirst_name\tsecond_name");
        assert_eq!(lines[1], "0\t0\t15\tT0\tT15");
        assert_eq!(lines[3], "0\t15\t16\tT15\tT16");
    }
}
