//! Whole-file parsing: control directives and per-table output framing.

use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::conf::{default_chains, find_file, ChainPolicy, Config, FileKind};
use crate::error::ParseError;
use crate::rule_parser::RuleParser;
use crate::{Family, PerFamily};

/// The top layer of the compiler: parses `.pyre` files and produces
/// complete `iptables-restore` scripts.
///
/// A layer above [`RuleParser`]: rule lines are delegated downwards, while
/// the `@table`, `@chain` and `@import` control directives are handled
/// here. Rules accumulate in per-family caches for the current table;
/// [`commit`](PyreParser::commit) frames a cache into a
/// `*table` … `COMMIT` section and appends it to the output.
///
/// ```
/// use pyrewall::{Config, PyreParser};
///
/// let lines = ["allow from 1.2.0.0/16", "allow from 2a07:e00:abc::/48"];
/// let (v4, v6) = PyreParser::new(Config::default()).parse_lines(lines).unwrap();
/// assert_eq!(v4[0], "*filter");
/// assert_eq!(v6[0], "*filter");
/// ```
pub struct PyreParser {
    conf: Config,
    table: String,
    /// Chain policies of the current table, in declaration order.
    chains: Vec<(String, ChainPolicy)>,
    cache: PerFamily<Vec<String>>,
    output: PerFamily<Vec<String>>,
    committed: bool,
    rp: RuleParser,
}

impl PyreParser {
    pub fn new(conf: Config) -> PyreParser {
        let table = conf.default_table.clone();
        let chains = default_chains(&table);
        let rp = RuleParser::new(&table, conf.strict);
        PyreParser {
            conf,
            table,
            chains,
            cache: PerFamily::default(),
            output: PerFamily::default(),
            committed: false,
            rp,
        }
    }

    /// Parses the Pyre file at `path` into `(v4_rules, v6_rules)`.
    pub fn parse_file(&mut self, path: &Path) -> Result<(Vec<String>, Vec<String>), ParseError> {
        let text = fs::read_to_string(path)?;
        self.parse_lines(text.lines())
    }

    /// Parses a sequence of Pyre lines into `(v4_rules, v6_rules)`, each a
    /// complete `iptables-restore` script.
    pub fn parse_lines<'a, I>(&mut self, lines: I) -> Result<(Vec<String>, Vec<String>), ParseError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for line in lines {
            self.parse_line(line)?;
        }
        debug!("finished parsing lines, committing");
        self.commit();
        Ok((
            std::mem::take(&mut self.output.v4),
            std::mem::take(&mut self.output.v6),
        ))
    }

    /// Parses one line: blank lines and comments are skipped, control
    /// directives dispatch to their handler, anything else goes through the
    /// rule parser into the caches.
    fn parse_line(&mut self, line: &str) -> Result<(), ParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let first = match tokens.first() {
            Some(first) => *first,
            None => return Ok(()),
        };
        if first.starts_with('#') {
            return Ok(());
        }

        match first {
            "@table" => self.set_table(&tokens[1..]),
            "@chain" => self.set_chain(&tokens[1..]),
            "@import" => self.import_file(&tokens[1..]),
            _ => {
                debug!("passing line starting with {:?} to the rule parser", first);
                if let Some(rules) = self.rp.parse(line)? {
                    if !rules.v4.is_empty() || !rules.v6.is_empty() {
                        self.committed = false;
                    }
                    self.cache.v4.extend(rules.v4);
                    self.cache.v6.extend(rules.v6);
                }
                Ok(())
            }
        }
    }

    /// Flushes both family caches into the output with their table framing
    /// and resets the chain policies for the current table.
    ///
    /// Committing an empty cache is a no-op, so consecutive commits never
    /// produce extra framing.
    pub fn commit(&mut self) {
        if !self.cache.v4.is_empty() {
            self.commit_family(Family::Ipv4);
        }
        if !self.cache.v6.is_empty() {
            self.commit_family(Family::Ipv6);
        }
        self.chains = default_chains(&self.table);
        self.committed = true;
    }

    fn commit_family(&mut self, family: Family) {
        debug!("committing {:?} cache to output", family);
        let mut section = vec![format!("*{}", self.table)];
        for (name, policy) in &self.chains {
            section.push(format!(":{} {} {}", name, policy.policy, policy.counters));
        }
        section.append(&mut self.cache[family]);
        section.push("COMMIT".to_string());
        section.push(format!("### End of table {} ###", self.table));
        self.output[family].extend(section);
    }

    /// Handler for the `@table <name>` directive.
    fn set_table(&mut self, args: &[&str]) -> Result<(), ParseError> {
        let table = *args.first().ok_or(ParseError::BadDirective {
            directive: "@table",
            expected: 1,
        })?;
        if table.eq_ignore_ascii_case(&self.table) {
            return Ok(());
        }
        debug!("switching table to {:?}", table);
        if !self.committed {
            self.commit();
        }
        self.table = table.to_string();
        self.chains = default_chains(&self.table);
        self.rp.set_table(&self.table);
        Ok(())
    }

    /// Handler for the `@chain <name> [policy] [counters]` directive.
    fn set_chain(&mut self, args: &[&str]) -> Result<(), ParseError> {
        let chain = *args.first().ok_or(ParseError::BadDirective {
            directive: "@chain",
            expected: 1,
        })?;
        let policy = args.get(1).copied().unwrap_or("ACCEPT");
        let counters = args.get(2).copied().unwrap_or("[0:0]");
        debug!("setting chain {} to policy {} {}", chain, policy, counters);

        let entry = ChainPolicy::new(policy, counters);
        match self.chains.iter_mut().find(|(name, _)| name.as_str() == chain) {
            Some((_, existing)) => *existing = entry,
            None => self.chains.push((chain.to_string(), entry)),
        }
        self.rp
            .set_chains(self.chains.iter().map(|(name, _)| name.clone()).collect());
        Ok(())
    }

    /// Handler for the `@import [type] <path>` directive.
    ///
    /// Without an explicit type the file kind is inferred from the
    /// extension, defaulting to Pyre source. Imported Pyre recurses through
    /// this parser line by line; raw `.v4`/`.v6` files append straight to
    /// the matching cache. A missing file is always fatal.
    fn import_file(&mut self, args: &[&str]) -> Result<(), ParseError> {
        let (kind, name) = match args {
            [] => {
                return Err(ParseError::BadDirective {
                    directive: "@import",
                    expected: 1,
                })
            }
            [name] => {
                let ext = name.rfind('.').map(|dot| &name[dot..]).unwrap_or("");
                (FileKind::from_extension(ext).unwrap_or(FileKind::Pyre), *name)
            }
            [kind, name, ..] => (FileKind::from_name(kind).unwrap_or(FileKind::Pyre), *name),
        };

        let path = find_file(name, &self.conf.search_dirs, &self.conf.search_extensions)?;
        info!("importing {:?} file at {}", kind, path.display());
        let text = fs::read_to_string(&path)?;
        match kind {
            FileKind::Pyre => {
                for line in text.lines() {
                    self.parse_line(line)?;
                }
            }
            FileKind::Ip4 => {
                self.cache.v4.extend(text.lines().map(|l| l.trim().to_string()));
                self.committed = false;
            }
            FileKind::Ip6 => {
                self.cache.v6.extend(text.lines().map(|l| l.trim().to_string()));
                self.committed = false;
            }
        }
        info!("successfully imported {:?}", name);
        Ok(())
    }
}
