//! The staging record for a single rule and its expansion into
//! `iptables-restore` lines.

use ipnetwork::IpNetwork;

use crate::{Action, Family, PerFamily};

/// Protocol names that select ICMP, normalised per family at emission.
const ICMP_ALIASES: &[&str] = &["icmp", "icmp4", "icmp6", "icmpv4", "icmpv6", "ipv6-icmp"];

/// Pseudo-protocols marking a comment-only rule.
const COMMENT_PROTOCOLS: &[&str] = &["comment", "rem", "rem4", "rem6"];

/// Staged state of one Pyre rule.
///
/// A rule accumulates a chain, protocol, ports, per-family networks,
/// interfaces, ICMP types, raw match fragments, an action and per-family
/// comments, then [`build`](Rule::build)s into one or more restore lines
/// for a requested family.
///
/// ```
/// use pyrewall::{Family, Rule};
///
/// let mut rule = Rule::new("INPUT");
/// rule.add_dports(["80".to_string(), "443".to_string()]);
/// rule.add_from_cidr("192.168.0.0/16".parse().unwrap());
/// assert_eq!(
///     rule.build(Family::Ipv4),
///     ["-A INPUT -m multiport --dports 80,443 -s 192.168.0.0/16 -j ACCEPT"]
/// );
/// ```
///
/// List fields beyond their first element are cross-product dimensions:
/// each extra element produces an additional emitted line overriding just
/// that dimension, extras at the same position sharing a line. Extra
/// protocols then multiply the whole set, and extra chains multiply the
/// result again.
#[derive(Debug, Clone, Default)]
pub struct Rule {
    chain: String,
    extra_chains: Vec<String>,
    action: Option<Action>,
    protocol: Option<String>,
    extra_protocols: Vec<String>,
    dports: Vec<String>,
    sports: Vec<String>,
    from_cidr: PerFamily<Vec<String>>,
    to_cidr: PerFamily<Vec<String>>,
    in_ifaces: Vec<String>,
    out_ifaces: Vec<String>,
    icmp_types: PerFamily<Vec<String>>,
    match_rules: Vec<String>,
    comment: PerFamily<Option<String>>,
}

/// One emitted line's deviations from the rule's primary values.
#[derive(Debug, Clone, Default)]
struct Override {
    chain: Option<String>,
    protocol: Option<String>,
    from_cidr: Option<String>,
    to_cidr: Option<String>,
    in_iface: Option<String>,
    out_iface: Option<String>,
    icmp_type: Option<String>,
}

impl Rule {
    pub fn new(chain: impl Into<String>) -> Rule {
        Rule {
            chain: chain.into(),
            ..Rule::default()
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn set_chain(&mut self, chain: impl Into<String>) {
        self.chain = chain.into();
    }

    pub fn add_extra_chain(&mut self, chain: impl Into<String>) {
        self.extra_chains.push(chain.into());
    }

    pub fn set_action(&mut self, action: Action) {
        self.action = Some(action);
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn set_protocol(&mut self, protocol: impl Into<String>) {
        self.protocol = Some(protocol.into());
    }

    pub fn add_extra_protocol(&mut self, protocol: impl Into<String>) {
        self.extra_protocols.push(protocol.into());
    }

    pub fn add_dports<I: IntoIterator<Item = String>>(&mut self, ports: I) {
        self.dports.extend(ports);
    }

    pub fn add_sports<I: IntoIterator<Item = String>>(&mut self, ports: I) {
        self.sports.extend(ports);
    }

    /// Files the network under its own family's source list.
    pub fn add_from_cidr(&mut self, net: IpNetwork) {
        self.from_cidr[family_of(&net)].push(net.to_string());
    }

    /// Files the network under its own family's destination list.
    pub fn add_to_cidr(&mut self, net: IpNetwork) {
        self.to_cidr[family_of(&net)].push(net.to_string());
    }

    pub fn add_in_iface(&mut self, iface: impl Into<String>) {
        self.in_ifaces.push(iface.into());
    }

    pub fn add_out_iface(&mut self, iface: impl Into<String>) {
        self.out_ifaces.push(iface.into());
    }

    pub fn add_icmp_types<I: IntoIterator<Item = String>>(&mut self, family: Family, types: I) {
        self.icmp_types[family].extend(types);
    }

    /// Appends an opaque match fragment (e.g. `-m state --state NEW`)
    /// emitted verbatim on every line of the rule.
    pub fn add_match(&mut self, fragment: impl Into<String>) {
        self.match_rules.push(fragment.into());
    }

    pub fn set_comment(&mut self, family: Family, text: impl Into<String>) {
        self.comment[family] = Some(text.into());
    }

    /// Expands the rule into its `iptables-restore` lines for `family`.
    ///
    /// Comment-only rules produce just their `# …` line (or nothing for a
    /// family without a comment); family-restricted ICMP protocols produce
    /// nothing for the other family.
    pub fn build(&self, family: Family) -> Vec<String> {
        if let Some(protocol) = self.protocol.as_deref() {
            if COMMENT_PROTOCOLS.contains(&protocol) {
                return match &self.comment[family] {
                    Some(text) => vec![format!("# {}", text)],
                    None => Vec::new(),
                };
            }
            if matches!(protocol, "icmp4" | "icmpv4") && family != Family::Ipv4 {
                return Vec::new();
            }
            if matches!(protocol, "icmp6" | "icmpv6" | "ipv6-icmp") && family != Family::Ipv6 {
                return Vec::new();
            }
        }

        let mut lines = Vec::new();
        if let Some(text) = &self.comment[family] {
            lines.push(format!("# {}", text));
        }
        lines.push(self.render(family, &Override::default()));

        for ovr in &self.expand(family) {
            lines.push(self.render(family, ovr));
        }

        lines
    }

    /// Materialises the cross-product override records for `family`.
    ///
    /// Extra networks, interfaces and ICMP types are zipped positionally
    /// into shared records; the set is then duplicated once per extra
    /// protocol, and the result duplicated once per extra chain.
    fn expand(&self, family: Family) -> Vec<Override> {
        fn slot(overrides: &mut Vec<Override>, pos: usize) -> &mut Override {
            while overrides.len() <= pos {
                overrides.push(Override::default());
            }
            &mut overrides[pos]
        }

        let mut overrides: Vec<Override> = Vec::new();
        for (i, net) in self.from_cidr[family].iter().skip(1).enumerate() {
            slot(&mut overrides, i).from_cidr = Some(net.clone());
        }
        for (i, net) in self.to_cidr[family].iter().skip(1).enumerate() {
            slot(&mut overrides, i).to_cidr = Some(net.clone());
        }
        for (i, iface) in self.in_ifaces.iter().skip(1).enumerate() {
            slot(&mut overrides, i).in_iface = Some(iface.clone());
        }
        for (i, icmp_type) in self.icmp_types[family].iter().skip(1).enumerate() {
            slot(&mut overrides, i).icmp_type = Some(icmp_type.clone());
        }
        for (i, iface) in self.out_ifaces.iter().skip(1).enumerate() {
            slot(&mut overrides, i).out_iface = Some(iface.clone());
        }

        // Snapshots keep the loops from walking the records they append.
        let snapshot = overrides.clone();
        for protocol in &self.extra_protocols {
            overrides.push(Override {
                protocol: Some(protocol.clone()),
                ..Override::default()
            });
            for base in &snapshot {
                let mut ovr = base.clone();
                ovr.protocol = Some(protocol.clone());
                overrides.push(ovr);
            }
        }

        let snapshot = overrides.clone();
        for chain in &self.extra_chains {
            overrides.push(Override {
                chain: Some(chain.clone()),
                ..Override::default()
            });
            for base in &snapshot {
                let mut ovr = base.clone();
                ovr.chain = Some(chain.clone());
                overrides.push(ovr);
            }
        }

        overrides
    }

    /// Renders a single restore line from the primary values with `ovr`
    /// applied on top.
    fn render(&self, family: Family, ovr: &Override) -> String {
        let chain = ovr.chain.as_deref().unwrap_or(&self.chain);
        let mut line = format!("-A {}", chain);

        let protocol = ovr.protocol.as_deref().or(self.protocol.as_deref());
        if let Some(protocol) = protocol {
            let rendered = if ICMP_ALIASES.contains(&protocol) {
                match family {
                    Family::Ipv4 => "icmp",
                    Family::Ipv6 => "ipv6-icmp",
                }
            } else {
                protocol
            };
            line.push_str(&format!(" -p {}", rendered));

            let icmp_type = ovr
                .icmp_type
                .as_deref()
                .or_else(|| self.icmp_types[family].first().map(String::as_str));
            if ICMP_ALIASES.contains(&protocol) {
                if let Some(icmp_type) = icmp_type {
                    let flag = match family {
                        Family::Ipv4 => "--icmp-type",
                        Family::Ipv6 => "--icmpv6-type",
                    };
                    line.push_str(&format!(" {} {}", flag, icmp_type));
                }
            }
        }

        line.push_str(&render_ports(&self.dports, 'd'));
        line.push_str(&render_ports(&self.sports, 's'));

        for fragment in &self.match_rules {
            line.push_str(&format!(" {}", fragment));
        }

        let from = ovr
            .from_cidr
            .as_deref()
            .or_else(|| self.from_cidr[family].first().map(String::as_str));
        if let Some(from) = from {
            line.push_str(&format!(" -s {}", from));
        }
        let to = ovr
            .to_cidr
            .as_deref()
            .or_else(|| self.to_cidr[family].first().map(String::as_str));
        if let Some(to) = to {
            line.push_str(&format!(" -d {}", to));
        }
        let in_iface = ovr
            .in_iface
            .as_deref()
            .or_else(|| self.in_ifaces.first().map(String::as_str));
        if let Some(iface) = in_iface {
            line.push_str(&format!(" -i {}", iface));
        }
        let out_iface = ovr
            .out_iface
            .as_deref()
            .or_else(|| self.out_ifaces.first().map(String::as_str));
        if let Some(iface) = out_iface {
            line.push_str(&format!(" -o {}", iface));
        }

        let target = self.action.as_ref().map_or("ACCEPT", Action::target);
        line.push_str(&format!(" -j {}", target));

        line
    }
}

fn family_of(net: &IpNetwork) -> Family {
    match net {
        IpNetwork::V4(_) => Family::Ipv4,
        IpNetwork::V6(_) => Family::Ipv6,
    }
}

/// A single port with no range collapses to `--dport`/`--sport`; anything
/// else goes through the multiport match.
fn render_ports(ports: &[String], direction: char) -> String {
    if ports.is_empty() {
        return String::new();
    }
    if ports.len() == 1 && !ports[0].contains(':') {
        return format!(" --{}port {}", direction, ports[0]);
    }
    format!(" -m multiport --{}ports {}", direction, ports.join(","))
}
