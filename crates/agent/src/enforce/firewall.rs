// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dedicated netfilter chain (`ZT_ACL`).
//!
//! The chain is rebuilt in a staging chain and swapped atomically: the new
//! jump is inserted before the old one is removed, so the overlay interface
//! never has an observable default-allow moment. The chain always ends in
//! DROP and carries exactly one `ESTABLISHED,RELATED` acceptor.

use ztproto::plan::{FirewallRule, Protocol, RuleAction};

use crate::enforce::run_cmd;
use crate::error::{AgentError, AgentResult};

pub const CHAIN: &str = "ZT_ACL";
const STAGING: &str = "ZT_ACL_NEW";

pub struct FirewallChain {
    /// Overlay interface the chain is hooked on.
    pub interface: String,
}

impl FirewallChain {
    pub fn new(interface: &str) -> Self {
        Self { interface: interface.to_owned() }
    }

    /// Verify the host provides a netfilter chain facility. The agent
    /// refuses to start without it.
    pub async fn probe() -> AgentResult<()> {
        run_cmd("iptables", &["-w", "-L", "-n"])
            .await
            .map_err(|e| AgentError::Config(format!("netfilter unavailable: {e}")))?;
        Ok(())
    }

    async fn chain_exists(&self, chain: &str) -> bool {
        run_cmd("iptables", &["-w", "-n", "-L", chain]).await.is_ok()
    }

    async fn jump_exists(&self, chain: &str) -> bool {
        run_cmd("iptables", &["-w", "-C", "INPUT", "-i", &self.interface, "-j", chain])
            .await
            .is_ok()
    }

    /// Populate `chain` with the compiled rules: one ESTABLISHED acceptor,
    /// one accept per rule, final DROP.
    async fn fill_chain(&self, chain: &str, rules: &[FirewallRule]) -> AgentResult<()> {
        run_cmd(
            "iptables",
            &[
                "-w", "-A", chain, "-m", "conntrack", "--ctstate", "ESTABLISHED,RELATED", "-j",
                "ACCEPT",
            ],
        )
        .await?;

        for rule in rules {
            if rule.action != RuleAction::Accept {
                continue;
            }
            let mut args: Vec<String> = vec!["-w".into(), "-A".into(), chain.into()];
            if rule.src != "any" {
                args.push("-s".into());
                args.push(rule.src.clone());
            }
            match rule.proto {
                Protocol::Any => {}
                proto => {
                    args.push("-p".into());
                    args.push(proto.as_str().into());
                }
            }
            if let Some(port) = rule.port {
                // --dport needs a protocol; skip the port match for `any`.
                if rule.proto == Protocol::Tcp || rule.proto == Protocol::Udp {
                    args.push("--dport".into());
                    args.push(if port.is_single() {
                        port.start.to_string()
                    } else {
                        format!("{}:{}", port.start, port.end)
                    });
                }
            }
            args.push("-j".into());
            args.push("ACCEPT".into());
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            run_cmd("iptables", &arg_refs).await?;
        }

        run_cmd("iptables", &["-w", "-A", chain, "-j", "DROP"]).await?;
        Ok(())
    }

    /// Rebuild the chain from `rules` and swap it in atomically.
    pub async fn apply(&self, rules: &[FirewallRule]) -> AgentResult<()> {
        // Drop any staging leftovers from an interrupted apply.
        if self.jump_exists(STAGING).await {
            run_cmd("iptables", &["-w", "-D", "INPUT", "-i", &self.interface, "-j", STAGING])
                .await?;
        }
        if self.chain_exists(STAGING).await {
            run_cmd("iptables", &["-w", "-F", STAGING]).await?;
            run_cmd("iptables", &["-w", "-X", STAGING]).await?;
        }

        run_cmd("iptables", &["-w", "-N", STAGING]).await?;
        self.fill_chain(STAGING, rules).await?;

        // Swap: new jump goes live before the old one is removed.
        run_cmd("iptables", &["-w", "-I", "INPUT", "1", "-i", &self.interface, "-j", STAGING])
            .await?;
        if self.jump_exists(CHAIN).await {
            run_cmd("iptables", &["-w", "-D", "INPUT", "-i", &self.interface, "-j", CHAIN])
                .await?;
        }
        if self.chain_exists(CHAIN).await {
            run_cmd("iptables", &["-w", "-F", CHAIN]).await?;
            run_cmd("iptables", &["-w", "-X", CHAIN]).await?;
        }
        run_cmd("iptables", &["-w", "-E", STAGING, CHAIN]).await?;
        Ok(())
    }

    /// Remove the jump and the chain. Idempotent.
    pub async fn teardown(&self) -> AgentResult<()> {
        for chain in [STAGING, CHAIN] {
            if self.jump_exists(chain).await {
                run_cmd("iptables", &["-w", "-D", "INPUT", "-i", &self.interface, "-j", chain])
                    .await?;
            }
            if self.chain_exists(chain).await {
                run_cmd("iptables", &["-w", "-F", chain]).await?;
                run_cmd("iptables", &["-w", "-X", chain]).await?;
            }
        }
        Ok(())
    }

    /// Verify the installed chain still closes with DROP. A chain that does
    /// not is a broken default-deny posture and must stop the agent.
    pub async fn verify_default_deny(&self) -> AgentResult<()> {
        let out = run_cmd("iptables", &["-w", "-S", CHAIN]).await?;
        let closes_with_drop = out
            .lines()
            .last()
            .map(|line| line.trim().ends_with("-j DROP"))
            .unwrap_or(false);
        if !closes_with_drop {
            return Err(AgentError::InvariantViolated(format!(
                "chain {CHAIN} does not end in DROP"
            )));
        }
        Ok(())
    }

    /// Packets dropped by the chain's final DROP since boot; reported to the
    /// trust engine as firewall violations.
    pub async fn dropped_packets(&self) -> Option<u64> {
        let out = run_cmd("iptables", &["-w", "-L", CHAIN, "-v", "-x", "-n"]).await.ok()?;
        // Last DROP line: "<pkts> <bytes> DROP all -- * * 0.0.0.0/0 0.0.0.0/0"
        out.lines()
            .rev()
            .find(|line| line.contains("DROP"))
            .and_then(|line| line.split_whitespace().next())
            .and_then(|pkts| pkts.parse().ok())
    }
}

/// Order rules for chain installation: priority descending, exact ports
/// before ranges before portless, stable otherwise.
pub fn installation_order(rules: &[FirewallRule]) -> Vec<FirewallRule> {
    let mut ordered = rules.to_vec();
    ordered.sort_by(|a, b| {
        b.priority.cmp(&a.priority).then_with(|| {
            let rank = |r: &FirewallRule| match r.port {
                Some(p) if p.is_single() => 2,
                Some(_) => 1,
                None => 0,
            };
            rank(b).cmp(&rank(a))
        })
    });
    ordered
}

#[cfg(test)]
#[path = "firewall_tests.rs"]
mod tests;
