//! Tokenises single Pyre rule lines and drives a [`Rule`] through keyword
//! handlers.

use std::collections::VecDeque;

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use log::{debug, warn};

use crate::conf::default_chains;
use crate::error::RuleError;
use crate::rule::Rule;
use crate::{Action, Family, PerFamily};

/// Chains a rule may be attached to with the `chain` keyword.
const BUILTIN_CHAINS: &[&str] = &["INPUT", "FORWARD", "OUTPUT", "PREROUTING", "POSTROUTING"];

/// Connection tracking states accepted by the `state` keyword.
const CONN_STATES: &[&str] = &["INVALID", "NEW", "RELATED", "ESTABLISHED"];

/// Every recognised rule keyword. Aliases collapse onto one variant in
/// [`Keyword::parse`]; dispatch is an exhaustive match, so adding a variant
/// without a handler will not compile.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Keyword {
    Allow,
    Drop,
    Reject,
    Forward,
    Output,
    Chain,
    All,
    From,
    To,
    IfIn,
    IfOut,
    Port,
    Sport,
    State,
    Icmp,
    Icmp4,
    Icmp6,
    Rem,
    Rem4,
    Rem6,
    Ipt,
    Ipt4,
    Ipt6,
}

impl Keyword {
    fn parse(token: &str) -> Option<Keyword> {
        Some(match token {
            "allow" | "accept" => Keyword::Allow,
            "drop" => Keyword::Drop,
            "reject" => Keyword::Reject,
            "forward" => Keyword::Forward,
            "output" => Keyword::Output,
            "chain" => Keyword::Chain,
            "all" => Keyword::All,
            "from" => Keyword::From,
            "to" => Keyword::To,
            "if-in" => Keyword::IfIn,
            "if-out" => Keyword::IfOut,
            "port" => Keyword::Port,
            "sport" => Keyword::Sport,
            "state" => Keyword::State,
            "icmp" => Keyword::Icmp,
            "icmp4" | "icmpv4" => Keyword::Icmp4,
            "icmp6" | "icmpv6" => Keyword::Icmp6,
            "rem" | "remark" => Keyword::Rem,
            "rem4" | "remv4" | "remark4" | "remarkv4" => Keyword::Rem4,
            "rem6" | "remv6" | "remark6" | "remarkv6" => Keyword::Rem6,
            "ipt" => Keyword::Ipt,
            "ipt4" => Keyword::Ipt4,
            "ipt6" => Keyword::Ipt6,
            _ => return None,
        })
    }
}

/// Parses individual Pyre rules such as `allow port 22` into per-family
/// iptables lines.
///
/// ```
/// use pyrewall::RuleParser;
///
/// let mut parser = RuleParser::new("filter", false);
/// let lines = parser.parse("allow port 22 from 192.168.0.0/16").unwrap().unwrap();
/// assert_eq!(lines.v4, ["-A INPUT -p tcp --dport 22 -s 192.168.0.0/16 -j ACCEPT"]);
/// // The rule names an IPv4 network, so no IPv6 rules were generated.
/// assert!(lines.v6.is_empty());
/// ```
pub struct RuleParser {
    /// Chain names of the current table, consulted by the `all` keyword.
    chains: Vec<String>,
    strict: bool,
    rule: Rule,
    has_v4: bool,
    has_v6: bool,
    /// Raw passthrough lines collected by `ipt`/`ipt4`/`ipt6`.
    raw: PerFamily<Vec<String>>,
}

impl RuleParser {
    pub fn new(table: &str, strict: bool) -> RuleParser {
        RuleParser {
            chains: default_chains(table)
                .into_iter()
                .map(|(name, _)| name)
                .collect(),
            strict,
            rule: Rule::new("INPUT"),
            has_v4: false,
            has_v6: false,
            raw: PerFamily::default(),
        }
    }

    /// Resets the chain set to the defaults of `table`.
    pub fn set_table(&mut self, table: &str) {
        self.chains = default_chains(table)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
    }

    /// Replaces the chain set consulted by the `all` keyword.
    pub fn set_chains(&mut self, chains: Vec<String>) {
        self.chains = chains;
    }

    /// Parses one source line into its per-family rule lines.
    ///
    /// Returns `Ok(None)` when the rule was discarded with a warning
    /// (unknown keyword in non-strict mode). Blank lines and comment lines
    /// produce empty output.
    pub fn parse(&mut self, line: &str) -> Result<Option<PerFamily<Vec<String>>>, RuleError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(Some(PerFamily::default()));
        }

        let mut tokens: VecDeque<&str> = line.split_whitespace().collect();
        let mut segment = 0;
        while let Some(token) = tokens.pop_front() {
            if token.starts_with('#') {
                debug!("token {:?} starts a trailing comment, stopping", token);
                break;
            }
            let keyword = match Keyword::parse(token) {
                Some(keyword) => keyword,
                None => {
                    self.reset();
                    if self.strict {
                        return Err(RuleError::UnknownKeyword(token.to_string()));
                    }
                    warn!("no handler for keyword {:?}, discarding rule", token);
                    return Ok(None);
                }
            };
            if let Err(err) = self.dispatch(keyword, segment, &mut tokens) {
                self.reset();
                return Err(err);
            }
            segment += 1;
        }

        Ok(Some(self.finish()))
    }

    /// Emits the staged rule for whichever families the line implicated and
    /// resets for the next line.
    fn finish(&mut self) -> PerFamily<Vec<String>> {
        let out = if !self.raw.v4.is_empty() || !self.raw.v6.is_empty() {
            std::mem::take(&mut self.raw)
        } else if !self.has_v4 && !self.has_v6 {
            // Family-agnostic: one build serves both streams.
            let lines = self.rule.build(Family::Ipv4);
            PerFamily {
                v4: lines.clone(),
                v6: lines,
            }
        } else {
            PerFamily {
                v4: if self.has_v4 {
                    self.rule.build(Family::Ipv4)
                } else {
                    Vec::new()
                },
                v6: if self.has_v6 {
                    self.rule.build(Family::Ipv6)
                } else {
                    Vec::new()
                },
            }
        };
        self.reset();
        out
    }

    fn reset(&mut self) {
        debug!("resetting rule state");
        self.rule = Rule::new("INPUT");
        self.has_v4 = false;
        self.has_v6 = false;
        self.raw = PerFamily::default();
    }

    fn dispatch(
        &mut self,
        keyword: Keyword,
        segment: usize,
        tokens: &mut VecDeque<&str>,
    ) -> Result<(), RuleError> {
        match keyword {
            Keyword::Allow => self.rule.set_action(Action::Accept),
            Keyword::Drop => self.rule.set_action(Action::Drop),
            Keyword::Reject => self.rule.set_action(Action::Reject),
            Keyword::Forward => self.rule.set_chain("FORWARD"),
            Keyword::Output => self.rule.set_chain("OUTPUT"),
            Keyword::Chain => self.handle_chain(tokens)?,
            Keyword::All => self.handle_all(),
            Keyword::From => self.handle_cidrs(tokens, true)?,
            Keyword::To => self.handle_cidrs(tokens, false)?,
            Keyword::IfIn => {
                for iface in next_arg(tokens, "if-in")?.split(',') {
                    self.rule.add_in_iface(iface);
                }
            }
            Keyword::IfOut => {
                for iface in next_arg(tokens, "if-out")?.split(',') {
                    self.rule.add_out_iface(iface);
                }
            }
            Keyword::Port => self.handle_port(tokens, false)?,
            Keyword::Sport => self.handle_port(tokens, true)?,
            Keyword::State => self.handle_state(tokens)?,
            Keyword::Icmp => self.handle_icmp(tokens, None)?,
            Keyword::Icmp4 => self.handle_icmp(tokens, Some(Family::Ipv4))?,
            Keyword::Icmp6 => self.handle_icmp(tokens, Some(Family::Ipv6))?,
            Keyword::Rem => self.handle_rem(tokens, segment, None),
            Keyword::Rem4 => self.handle_rem(tokens, segment, Some(Family::Ipv4)),
            Keyword::Rem6 => self.handle_rem(tokens, segment, Some(Family::Ipv6)),
            Keyword::Ipt => self.handle_ipt(tokens, None)?,
            Keyword::Ipt4 => self.handle_ipt(tokens, Some(Family::Ipv4))?,
            Keyword::Ipt6 => self.handle_ipt(tokens, Some(Family::Ipv6))?,
        }
        Ok(())
    }

    fn handle_chain(&mut self, tokens: &mut VecDeque<&str>) -> Result<(), RuleError> {
        let mut valid = Vec::new();
        for name in next_arg(tokens, "chain")?.split(',') {
            let upper = name.to_ascii_uppercase();
            if BUILTIN_CHAINS.contains(&upper.as_str()) {
                valid.push(upper);
            } else if self.strict {
                return Err(RuleError::UnknownChain(name.to_string()));
            } else {
                warn!("ignoring unknown chain {:?}", name);
            }
        }

        let mut names = valid.into_iter();
        match names.next() {
            Some(first) => self.rule.set_chain(first),
            None => return Err(RuleError::Syntax("no valid chains given to `chain`".to_string())),
        }
        for extra in names {
            self.rule.add_extra_chain(extra);
        }
        Ok(())
    }

    /// Expands the rule over every chain of the current table.
    fn handle_all(&mut self) {
        let primary = self.rule.chain().to_string();
        for name in &self.chains {
            if !name.eq_ignore_ascii_case(&primary) {
                self.rule.add_extra_chain(name.clone());
            }
        }
    }

    fn handle_cidrs(&mut self, tokens: &mut VecDeque<&str>, source: bool) -> Result<(), RuleError> {
        let keyword = if source { "from" } else { "to" };
        for item in next_arg(tokens, keyword)?.split(',') {
            let net = parse_network(item, self.strict)?;
            match net {
                IpNetwork::V4(_) => self.has_v4 = true,
                IpNetwork::V6(_) => self.has_v6 = true,
            }
            if source {
                self.rule.add_from_cidr(net);
            } else {
                self.rule.add_to_cidr(net);
            }
        }
        Ok(())
    }

    fn handle_port(&mut self, tokens: &mut VecDeque<&str>, source: bool) -> Result<(), RuleError> {
        let keyword = if source { "sport" } else { "port" };
        let mut spec = next_arg(tokens, keyword)?;

        // The protocol modifier may come before or after the port list:
        // `port udp 53` and `port 53,123 both` are both accepted.
        let mut protocol = None;
        let mut both = false;
        match spec {
            "tcp" | "udp" => {
                protocol = Some(spec);
                spec = next_arg(tokens, keyword)?;
            }
            "both" => {
                both = true;
                spec = next_arg(tokens, keyword)?;
            }
            _ => match tokens.front().copied() {
                Some(modifier @ ("tcp" | "udp")) => {
                    protocol = Some(modifier);
                    tokens.pop_front();
                }
                Some("both") => {
                    both = true;
                    tokens.pop_front();
                }
                _ => {}
            },
        }

        let ports = self.parse_ports(spec)?;

        if both {
            if self.rule.protocol().is_none() {
                self.rule.set_protocol("tcp");
            }
            if self.rule.protocol() != Some("udp") {
                self.rule.add_extra_protocol("udp");
            }
        } else if let Some(protocol) = protocol {
            self.rule.set_protocol(protocol);
        } else if self.rule.protocol().is_none() {
            self.rule.set_protocol("tcp");
        }

        if source {
            self.rule.add_sports(ports);
        } else {
            self.rule.add_dports(ports);
        }
        Ok(())
    }

    /// Validates a comma-separated port spec into its serialised items.
    /// Invalid ports are fatal in strict mode and skipped with a warning
    /// otherwise; a spec with no valid ports left is always an error.
    fn parse_ports(&self, spec: &str) -> Result<Vec<String>, RuleError> {
        let mut ports = Vec::new();
        for item in spec.split(',') {
            match parse_port_item(item) {
                Ok(port) => ports.push(port),
                Err(err) => {
                    if self.strict {
                        return Err(err);
                    }
                    warn!("invalid port {:?} in rule, ignoring: {}", item, err);
                }
            }
        }
        if ports.is_empty() {
            return Err(RuleError::Syntax(format!("no valid ports in {:?}", spec)));
        }
        Ok(ports)
    }

    fn handle_state(&mut self, tokens: &mut VecDeque<&str>) -> Result<(), RuleError> {
        let mut states = Vec::new();
        for name in next_arg(tokens, "state")?.split(',') {
            let upper = name.to_ascii_uppercase();
            if !CONN_STATES.contains(&upper.as_str()) {
                return Err(RuleError::UnknownState(name.to_string()));
            }
            states.push(upper);
        }
        self.rule
            .add_match(format!("-m state --state {}", states.join(",")));
        Ok(())
    }

    fn handle_icmp(
        &mut self,
        tokens: &mut VecDeque<&str>,
        family: Option<Family>,
    ) -> Result<(), RuleError> {
        match family {
            None => {
                self.rule.set_protocol("icmp");
                self.has_v4 = true;
                self.has_v6 = true;
            }
            Some(Family::Ipv4) => {
                self.rule.set_protocol("icmpv4");
                self.has_v4 = true;
            }
            Some(Family::Ipv6) => {
                self.rule.set_protocol("icmpv6");
                self.has_v6 = true;
            }
        }

        if matches!(tokens.front(), Some(&"type") | Some(&"types")) {
            tokens.pop_front();
            let types = parse_type_list(next_arg(tokens, "type")?);
            let target = match family {
                // Generic `icmp` with explicit types narrows to IPv4 only.
                None => {
                    self.has_v6 = false;
                    Family::Ipv4
                }
                Some(family) => family,
            };
            self.rule.add_icmp_types(target, types);
        }
        Ok(())
    }

    fn handle_rem(&mut self, tokens: &mut VecDeque<&str>, segment: usize, family: Option<Family>) {
        let text = drain_line(tokens);
        // At segment 0 the whole line is a comment; later on it annotates
        // the rule built so far.
        if segment == 0 {
            self.rule.set_protocol(match family {
                None => "rem",
                Some(Family::Ipv4) => "rem4",
                Some(Family::Ipv6) => "rem6",
            });
        }
        match family {
            None => {
                self.rule.set_comment(Family::Ipv4, text.clone());
                self.rule.set_comment(Family::Ipv6, text);
            }
            Some(family) => {
                // Force per-family builds so the comment stays out of the
                // other family's stream.
                self.has_v4 = true;
                self.has_v6 = true;
                self.rule.set_comment(family, text);
            }
        }
    }

    fn handle_ipt(
        &mut self,
        tokens: &mut VecDeque<&str>,
        family: Option<Family>,
    ) -> Result<(), RuleError> {
        let raw = drain_line(tokens);
        if raw.is_empty() {
            return Err(RuleError::Syntax("missing rule text after ipt".to_string()));
        }
        match family {
            None => {
                self.raw.v4.push(raw.clone());
                self.raw.v6.push(raw);
            }
            Some(family) => self.raw[family].push(raw),
        }
        Ok(())
    }
}

fn next_arg<'a>(tokens: &mut VecDeque<&'a str>, keyword: &str) -> Result<&'a str, RuleError> {
    tokens
        .pop_front()
        .ok_or_else(|| RuleError::Syntax(format!("missing argument to {:?}", keyword)))
}

fn drain_line(tokens: &mut VecDeque<&str>) -> String {
    tokens.drain(..).collect::<Vec<_>>().join(" ")
}

/// Parses one network, masking host bits when strict mode is off and
/// rejecting them when it is on.
fn parse_network(text: &str, strict: bool) -> Result<IpNetwork, RuleError> {
    let invalid = || RuleError::InvalidNetwork(text.to_string());
    let net: IpNetwork = text.parse().map_err(|_| invalid())?;
    match net {
        IpNetwork::V4(net) if net.ip() != net.network() => {
            if strict {
                return Err(invalid());
            }
            Ok(IpNetwork::V4(
                Ipv4Network::new(net.network(), net.prefix()).map_err(|_| invalid())?,
            ))
        }
        IpNetwork::V6(net) if net.ip() != net.network() => {
            if strict {
                return Err(invalid());
            }
            Ok(IpNetwork::V6(
                Ipv6Network::new(net.network(), net.prefix()).map_err(|_| invalid())?,
            ))
        }
        net => Ok(net),
    }
}

/// Parses and bounds-checks a port number.
pub fn valid_port(text: &str) -> Result<u16, RuleError> {
    match text.trim().parse::<u16>() {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(RuleError::InvalidPort(text.to_string())),
    }
}

/// One port spec item: a plain port, or a `lo:hi` / `lo-hi` range
/// serialised with the colon iptables expects.
fn parse_port_item(item: &str) -> Result<String, RuleError> {
    if let Some(sep) = item.find([':', '-']) {
        let (lo, hi) = item.split_at(sep);
        let lo = valid_port(lo)?;
        let hi = valid_port(&hi[1..])?;
        return Ok(format!("{}:{}", lo, hi));
    }
    Ok(valid_port(item)?.to_string())
}

/// Type-list items expand numeric `a-b` / `a:b` ranges inclusively; items
/// containing anything non-numeric pass through untouched.
fn parse_type_list(spec: &str) -> Vec<String> {
    let mut types = Vec::new();
    for item in spec.split(',') {
        if let Some(sep) = item.find(['-', ':']) {
            let (lo, hi) = item.split_at(sep);
            if let (Ok(lo), Ok(hi)) = (lo.parse::<u32>(), hi[1..].parse::<u32>()) {
                if lo <= hi {
                    types.extend((lo..=hi).map(|t| t.to_string()));
                    continue;
                }
            }
        }
        types.push(item.to_string());
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> PerFamily<Vec<String>> {
        RuleParser::new("filter", false)
            .parse(line)
            .unwrap()
            .expect("rule should not be discarded")
    }

    #[test]
    fn port_rule_is_family_agnostic() {
        let lines = parse("allow port 800");
        let expected = ["-A INPUT -p tcp --dport 800 -j ACCEPT"];
        assert_eq!(lines.v4, expected);
        assert_eq!(lines.v6, expected);
    }

    #[test]
    fn port_list_with_ranges_normalises_separators() {
        let lines = parse("allow port 123,443,600-900,1000:2000");
        let expected = ["-A INPUT -p tcp -m multiport --dports 123,443,600:900,1000:2000 -j ACCEPT"];
        assert_eq!(lines.v4, expected);
        assert_eq!(lines.v6, expected);
    }

    #[test]
    fn explicit_udp_overrides_the_default_protocol() {
        let lines = parse("allow port udp 53");
        assert_eq!(lines.v4, ["-A INPUT -p udp --dport 53 -j ACCEPT"]);
    }

    #[test]
    fn port_both_emits_tcp_and_udp() {
        let lines = parse("allow port both 53");
        assert_eq!(
            lines.v4,
            [
                "-A INPUT -p tcp --dport 53 -j ACCEPT",
                "-A INPUT -p udp --dport 53 -j ACCEPT",
            ]
        );
    }

    #[test]
    fn sport_appends_to_source_ports() {
        let lines = parse("allow sport 1024:65535 port 53");
        assert_eq!(
            lines.v4,
            ["-A INPUT -p tcp --dport 53 -m multiport --sports 1024:65535 -j ACCEPT"]
        );
    }

    #[test]
    fn from_v4_restricts_to_the_v4_stream() {
        let lines = parse("allow port 800 from 1.2.3.4");
        assert_eq!(lines.v4, ["-A INPUT -p tcp --dport 800 -s 1.2.3.4/32 -j ACCEPT"]);
        assert!(lines.v6.is_empty());
    }

    #[test]
    fn from_v6_restricts_to_the_v6_stream() {
        let lines = parse("allow port 800 from 2a07:e00::1");
        assert!(lines.v4.is_empty());
        assert_eq!(
            lines.v6,
            ["-A INPUT -p tcp --dport 800 -s 2a07:e00::1/128 -j ACCEPT"]
        );
    }

    #[test]
    fn mixed_families_split_the_rule() {
        let lines = parse("allow port 9090,1010 both from 10.0.0.1,2a07:e01::/32");
        assert_eq!(
            lines.v4,
            [
                "-A INPUT -p tcp -m multiport --dports 9090,1010 -s 10.0.0.1/32 -j ACCEPT",
                "-A INPUT -p udp -m multiport --dports 9090,1010 -s 10.0.0.1/32 -j ACCEPT",
            ]
        );
        assert_eq!(
            lines.v6,
            [
                "-A INPUT -p tcp -m multiport --dports 9090,1010 -s 2a07:e01::/32 -j ACCEPT",
                "-A INPUT -p udp -m multiport --dports 9090,1010 -s 2a07:e01::/32 -j ACCEPT",
            ]
        );
    }

    #[test]
    fn host_bits_are_masked_when_strict_is_off() {
        let lines = parse("allow from 10.1.2.3/24");
        assert_eq!(lines.v4, ["-A INPUT -s 10.1.2.0/24 -j ACCEPT"]);
    }

    #[test]
    fn host_bits_are_fatal_in_strict_mode() {
        let err = RuleParser::new("filter", true)
            .parse("allow from 10.1.2.3/24")
            .unwrap_err();
        assert!(matches!(err, RuleError::InvalidNetwork(_)));
    }

    #[test]
    fn icmp_with_type_range_narrows_to_v4() {
        let lines = parse("allow icmp type 0-3");
        assert_eq!(
            lines.v4,
            [
                "-A INPUT -p icmp --icmp-type 0 -j ACCEPT",
                "-A INPUT -p icmp --icmp-type 1 -j ACCEPT",
                "-A INPUT -p icmp --icmp-type 2 -j ACCEPT",
                "-A INPUT -p icmp --icmp-type 3 -j ACCEPT",
            ]
        );
        assert!(lines.v6.is_empty());
    }

    #[test]
    fn bare_icmp_reaches_both_families() {
        let lines = parse("allow icmp");
        assert_eq!(lines.v4, ["-A INPUT -p icmp -j ACCEPT"]);
        assert_eq!(lines.v6, ["-A INPUT -p ipv6-icmp -j ACCEPT"]);
    }

    #[test]
    fn icmp6_takes_named_types() {
        let lines = parse("allow icmp6 type echo-request,echo-reply");
        assert!(lines.v4.is_empty());
        assert_eq!(
            lines.v6,
            [
                "-A INPUT -p ipv6-icmp --icmpv6-type echo-request -j ACCEPT",
                "-A INPUT -p ipv6-icmp --icmpv6-type echo-reply -j ACCEPT",
            ]
        );
    }

    #[test]
    fn chain_keyword_sets_primary_and_extras() {
        let lines = parse("allow chain input,forward port 22");
        assert_eq!(
            lines.v4,
            [
                "-A INPUT -p tcp --dport 22 -j ACCEPT",
                "-A FORWARD -p tcp --dport 22 -j ACCEPT",
            ]
        );
    }

    #[test]
    fn unknown_chain_is_fatal_in_strict_mode() {
        let err = RuleParser::new("filter", true)
            .parse("allow chain input,bogus port 22")
            .unwrap_err();
        assert!(matches!(err, RuleError::UnknownChain(name) if name == "bogus"));
    }

    #[test]
    fn all_expands_over_the_remaining_chains() {
        let lines = parse("drop all state invalid");
        assert_eq!(
            lines.v4,
            [
                "-A INPUT -m state --state INVALID -j DROP",
                "-A FORWARD -m state --state INVALID -j DROP",
                "-A OUTPUT -m state --state INVALID -j DROP",
            ]
        );
    }

    #[test]
    fn state_names_are_uppercased_in_order() {
        let lines = parse("allow state related,established");
        assert_eq!(
            lines.v4,
            ["-A INPUT -m state --state RELATED,ESTABLISHED -j ACCEPT"]
        );
    }

    #[test]
    fn unknown_state_is_an_error() {
        let err = RuleParser::new("filter", false)
            .parse("allow state bogus")
            .unwrap_err();
        assert!(matches!(err, RuleError::UnknownState(name) if name == "bogus"));
    }

    #[test]
    fn interfaces_ride_along() {
        let lines = parse("allow port 53 if-in eth0 if-out eth1");
        assert_eq!(
            lines.v4,
            ["-A INPUT -p tcp --dport 53 -i eth0 -o eth1 -j ACCEPT"]
        );
    }

    #[test]
    fn leading_rem_is_a_pure_comment_line() {
        let lines = parse("rem trusted networks below");
        assert_eq!(lines.v4, ["# trusted networks below"]);
        assert_eq!(lines.v6, ["# trusted networks below"]);
    }

    #[test]
    fn rem4_comment_stays_out_of_the_v6_stream() {
        let lines = parse("rem4 v4 only note");
        assert_eq!(lines.v4, ["# v4 only note"]);
        assert!(lines.v6.is_empty());
    }

    #[test]
    fn trailing_rem4_annotates_without_dropping_the_v6_rule() {
        let lines = parse("allow port 22 rem4 office uplink");
        assert_eq!(
            lines.v4,
            ["# office uplink", "-A INPUT -p tcp --dport 22 -j ACCEPT"]
        );
        assert_eq!(lines.v6, ["-A INPUT -p tcp --dport 22 -j ACCEPT"]);
    }

    #[test]
    fn trailing_hash_comment_ends_the_rule() {
        let lines = parse("allow port 22 # ssh");
        assert_eq!(lines.v4, ["-A INPUT -p tcp --dport 22 -j ACCEPT"]);
    }

    #[test]
    fn ipt_passes_raw_rules_to_both_streams() {
        let raw = "-A FORWARD -p tcp --dport 420 --example testing -j ACCEPT";
        let lines = parse(&format!("ipt {}", raw));
        assert_eq!(lines.v4, [raw]);
        assert_eq!(lines.v6, [raw]);
    }

    #[test]
    fn ipt4_and_ipt6_stay_in_their_stream() {
        let lines = parse("ipt4 -A OUTPUT -s 1.2.3.0/24 -j ACCEPT");
        assert_eq!(lines.v4, ["-A OUTPUT -s 1.2.3.0/24 -j ACCEPT"]);
        assert!(lines.v6.is_empty());

        let lines = parse("ipt6 -A FORWARD -s 2a07:e00::/32 -j ACCEPT");
        assert!(lines.v4.is_empty());
        assert_eq!(lines.v6, ["-A FORWARD -s 2a07:e00::/32 -j ACCEPT"]);
    }

    #[test]
    fn unknown_keyword_discards_the_rule_with_a_warning() {
        let mut parser = RuleParser::new("filter", false);
        assert!(parser.parse("allow bogus port 22").unwrap().is_none());
        // The discarded rule must not leak state into the next line.
        let lines = parser.parse("allow port 22").unwrap().unwrap();
        assert_eq!(lines.v4, ["-A INPUT -p tcp --dport 22 -j ACCEPT"]);
    }

    #[test]
    fn unknown_keyword_is_fatal_in_strict_mode() {
        let err = RuleParser::new("filter", true)
            .parse("allow bogus port 22")
            .unwrap_err();
        assert!(matches!(err, RuleError::UnknownKeyword(word) if word == "bogus"));
    }

    #[test]
    fn invalid_port_is_skipped_with_a_warning() {
        let lines = parse("allow port 22,70000");
        assert_eq!(lines.v4, ["-A INPUT -p tcp --dport 22 -j ACCEPT"]);
    }

    #[test]
    fn invalid_port_is_fatal_in_strict_mode() {
        let err = RuleParser::new("filter", true)
            .parse("allow port 22,70000")
            .unwrap_err();
        assert!(matches!(err, RuleError::InvalidPort(port) if port == "70000"));
    }

    #[test]
    fn all_ports_invalid_is_always_an_error() {
        let err = RuleParser::new("filter", false)
            .parse("allow port 0,99999")
            .unwrap_err();
        assert!(matches!(err, RuleError::Syntax(_)));
    }

    #[test]
    fn valid_port_bounds() {
        assert_eq!(valid_port("1").unwrap(), 1);
        assert_eq!(valid_port("65535").unwrap(), 65535);
        assert!(valid_port("0").is_err());
        assert!(valid_port("65536").is_err());
        assert!(valid_port("-1").is_err());
        assert!(valid_port("ssh").is_err());
    }
}
