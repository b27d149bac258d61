//! Active agents, grouped by token.
//!
//! Token keys are case-insensitive: `eth` and `ETH` share one slot.

use std::collections::HashMap;

use crate::types::Agent;

#[derive(Debug, Default)]
pub struct AgentRegistry {
    /// Upper-case symbol → agents.
    by_token: HashMap<String, Vec<Agent>>,
}

fn token_key(token: &str) -> String {
    token.trim().to_ascii_uppercase()
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active agents currently registered for `token`.
    pub fn active_count(&self, token: &str) -> usize {
        self.by_token
            .get(&token_key(token))
            .map(|agents| agents.iter().filter(|a| a.is_active()).count())
            .unwrap_or(0)
    }

    pub fn insert(&mut self, agent: Agent) {
        self.by_token.entry(token_key(&agent.token)).or_default().push(agent);
    }

    /// Remove an agent by id, returning it if it was present.
    pub fn remove(&mut self, agent_id: &str) -> Option<Agent> {
        let mut removed = None;
        for agents in self.by_token.values_mut() {
            if let Some(idx) = agents.iter().position(|a| a.id == agent_id) {
                removed = Some(agents.remove(idx));
                break;
            }
        }
        self.by_token.retain(|_, agents| !agents.is_empty());
        removed
    }

    pub fn get(&self, agent_id: &str) -> Option<&Agent> {
        self.by_token
            .values()
            .flat_map(|agents| agents.iter())
            .find(|a| a.id == agent_id)
    }

    pub fn len(&self) -> usize {
        self.by_token.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}
