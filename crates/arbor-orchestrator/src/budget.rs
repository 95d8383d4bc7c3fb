//! Budget governor: cost accounting and ceilings across an agent tree
//!
//! Every node has an account with its own ceiling. Recording a cost event
//! charges the node and every ancestor in one write-locked update, so an
//! ancestor's spend always includes its descendants. Authorization checks
//! the whole ancestor chain.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use arbor_agent::CostEvent;
use arbor_core::fail_open::fail_open;
use arbor_core::{AgentId, ArborError, Result, Usd};

/// Who started the run; fixed for the governor's lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    /// Ceilings are reported but not enforced
    pub unlimited_budget: bool,
}

impl Principal {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unlimited_budget: false,
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unlimited_budget: true,
        }
    }
}

impl Default for Principal {
    fn default() -> Self {
        Self::user("local")
    }
}

/// Answer to a pre-call budget check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Allow,
    Deny(String),
}

impl Authorization {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Point-in-time view of one node's account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub node: AgentId,
    /// Own spend plus descendants
    pub cost_so_far: Usd,
    pub ceiling: Usd,
    /// Calls made by this node and its descendants
    pub calls: u32,
    pub extended_context_used: bool,
    /// Largest single call made by this node itself
    pub largest_call: Usd,
}

impl BudgetSnapshot {
    pub fn remaining(&self) -> Usd {
        self.ceiling.saturating_sub(self.cost_so_far)
    }
}

/// Credit ledger notified of every recorded call
#[async_trait]
pub trait CostSink: Send + Sync {
    async fn report(&self, node: &AgentId, event: &CostEvent) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Account {
    parent: Option<AgentId>,
    ceiling: Usd,
    spent: Usd,
    calls: u32,
    extended_context_used: bool,
    largest_call: Usd,
}

impl Account {
    fn new(parent: Option<AgentId>, ceiling: Usd) -> Self {
        Self {
            parent,
            ceiling,
            spent: Usd::ZERO,
            calls: 0,
            extended_context_used: false,
            largest_call: Usd::ZERO,
        }
    }

    fn remaining(&self) -> Usd {
        self.ceiling.saturating_sub(self.spent)
    }
}

/// Ids from `node` up to the root, node first
fn chain(accounts: &HashMap<AgentId, Account>, node: &AgentId) -> Vec<AgentId> {
    let mut ids = Vec::new();
    let mut cursor = Some(*node);
    while let Some(id) = cursor {
        match accounts.get(&id) {
            Some(account) => {
                ids.push(id);
                cursor = account.parent;
            }
            None => break,
        }
    }
    ids
}

/// Tracks spend and enforces ceilings for one tree
pub struct BudgetGovernor {
    principal: Principal,
    accounts: RwLock<HashMap<AgentId, Account>>,
    sink: Option<Arc<dyn CostSink>>,
}

impl BudgetGovernor {
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            accounts: RwLock::new(HashMap::new()),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn CostSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Open the root account
    pub async fn open_root(&self, node: AgentId, ceiling: Usd) {
        self.accounts.write().await.insert(node, Account::new(None, ceiling));
        info!(node = %node, ceiling = %ceiling, "Opened root budget");
    }

    /// Carve a child's ceiling out of its parent's remaining budget
    ///
    /// Without a request the child gets `default_fraction` of the parent's
    /// remaining budget. The ceiling never exceeds what any ancestor has left.
    pub async fn open_child(
        &self,
        parent: &AgentId,
        child: AgentId,
        requested: Option<Usd>,
        default_fraction: f64,
    ) -> Result<Usd> {
        let mut accounts = self.accounts.write().await;
        let parent_account = accounts
            .get(parent)
            .ok_or_else(|| ArborError::NodeNotFound(parent.to_string()))?;

        let available = chain(&accounts, parent)
            .iter()
            .filter_map(|id| accounts.get(id))
            .map(Account::remaining)
            .min()
            .unwrap_or(Usd::ZERO);

        let wanted = requested.unwrap_or_else(|| parent_account.remaining().scale(default_fraction));
        let ceiling = wanted.min(available);

        if ceiling.is_zero() && !self.principal.unlimited_budget {
            return Err(ArborError::BudgetExceeded(format!(
                "{} has no budget left to carve out for a child",
                parent
            )));
        }

        accounts.insert(child, Account::new(Some(*parent), ceiling));
        debug!(parent = %parent, child = %child, ceiling = %ceiling, "Opened child budget");
        Ok(ceiling)
    }

    /// Estimate the next call: the larger of the biggest call seen so far
    /// and the most the pending request can bill
    ///
    /// `worst_case` should price the prompt plus the full output allowance;
    /// the history only grows, so past calls alone underestimate.
    pub async fn estimate(&self, node: &AgentId, worst_case: Usd) -> Usd {
        let accounts = self.accounts.read().await;
        let largest = accounts.get(node).map(|a| a.largest_call).unwrap_or(Usd::ZERO);
        largest.max(worst_case)
    }

    /// Whether `node` may make a call costing about `estimate`
    pub async fn authorize(&self, node: &AgentId, estimate: Usd) -> Authorization {
        let accounts = self.accounts.read().await;
        let ids = chain(&accounts, node);
        if ids.is_empty() {
            return Authorization::Deny(format!("no budget account for {}", node));
        }

        for id in &ids {
            let Some(account) = accounts.get(id) else {
                continue;
            };
            if account.spent.saturating_add(estimate) > account.ceiling {
                let reason = format!(
                    "{} spent {} of its {} ceiling; next call estimated at {}",
                    if id == node { "node".to_string() } else { format!("ancestor {}", id.short()) },
                    account.spent,
                    account.ceiling,
                    estimate
                );
                if self.principal.unlimited_budget {
                    debug!(node = %node, principal = %self.principal.name, %reason, "Ceiling bypassed");
                    return Authorization::Allow;
                }
                warn!(node = %node, %reason, "Budget denied");
                return Authorization::Deny(reason);
            }
        }
        Authorization::Allow
    }

    /// Charge a call to `node` and every ancestor
    pub async fn record(&self, node: &AgentId, event: &CostEvent) -> Result<()> {
        {
            let mut accounts = self.accounts.write().await;
            let ids = chain(&accounts, node);
            if ids.is_empty() {
                return Err(ArborError::NodeNotFound(node.to_string()));
            }
            for id in &ids {
                if let Some(account) = accounts.get_mut(id) {
                    account.spent += event.cost;
                    account.calls += 1;
                    account.extended_context_used |= event.extended_context;
                    if id == node {
                        account.largest_call = account.largest_call.max(event.cost);
                    }
                }
            }
        }

        debug!(
            node = %node,
            cost = %event.cost,
            extended_context = event.extended_context,
            "Recorded cost"
        );

        if let Some(sink) = &self.sink {
            fail_open("cost_sink", || sink.report(node, event)).await;
        }
        Ok(())
    }

    pub async fn snapshot(&self, node: &AgentId) -> Option<BudgetSnapshot> {
        let accounts = self.accounts.read().await;
        accounts.get(node).map(|a| BudgetSnapshot {
            node: *node,
            cost_so_far: a.spent,
            ceiling: a.ceiling,
            calls: a.calls,
            extended_context_used: a.extended_context_used,
            largest_call: a.largest_call,
        })
    }

    /// Snapshots for many nodes under one read lock
    pub async fn snapshots(&self, nodes: &[AgentId]) -> HashMap<AgentId, BudgetSnapshot> {
        let accounts = self.accounts.read().await;
        nodes
            .iter()
            .filter_map(|id| {
                accounts.get(id).map(|a| {
                    (
                        *id,
                        BudgetSnapshot {
                            node: *id,
                            cost_so_far: a.spent,
                            ceiling: a.ceiling,
                            calls: a.calls,
                            extended_context_used: a.extended_context_used,
                            largest_call: a.largest_call,
                        },
                    )
                })
            })
            .collect()
    }

    pub async fn spent(&self, node: &AgentId) -> Usd {
        self.accounts
            .read()
            .await
            .get(node)
            .map(|a| a.spent)
            .unwrap_or(Usd::ZERO)
    }

    /// The least any account on the chain has left
    pub async fn remaining(&self, node: &AgentId) -> Usd {
        let accounts = self.accounts.read().await;
        chain(&accounts, node)
            .iter()
            .filter_map(|id| accounts.get(id))
            .map(Account::remaining)
            .min()
            .unwrap_or(Usd::ZERO)
    }
}
