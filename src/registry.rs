//! Read-only chain, token and tool metadata
//!
//! Consumed for validation hints, tagging and ranking. Nothing here decides
//! whether a transfer is correct.

use crate::config::{Settings, ToolKind};

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct TokenInfo {
    pub chain_id: u64,
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    pub key: String,
    pub name: String,
    pub kind: ToolKind,
    pub preference: f64,
}

/// Chain/token/tool lookups
pub trait Registry: Send + Sync {
    fn is_supported_chain(&self, chain_id: u64) -> bool;

    fn chain_name(&self, chain_id: u64) -> Option<String>;

    fn native_symbol(&self, chain_id: u64) -> Option<String>;

    /// Resolve a token by symbol (case-insensitive) or address
    fn find_token(&self, chain_id: u64, symbol_or_address: &str) -> Option<TokenInfo>;

    fn tool(&self, key: &str) -> Option<ToolInfo>;

    /// Preference score in [0, 1]; unknown tools are neutral
    fn tool_preference(&self, key: &str) -> f64 {
        self.tool(key).map(|t| t.preference).unwrap_or(0.5)
    }
}

struct ChainEntry {
    name: String,
    native_symbol: String,
    native_decimals: u8,
    tokens: Vec<TokenInfo>,
}

/// Registry built once from the settings file
pub struct ConfigRegistry {
    chains: HashMap<u64, ChainEntry>,
    tools: HashMap<String, ToolInfo>,
}

impl ConfigRegistry {
    pub fn from_settings(settings: &Settings) -> Self {
        let chains = settings
            .enabled_chains()
            .into_iter()
            .map(|(_, chain)| {
                let tokens = chain
                    .tokens
                    .iter()
                    .map(|t| TokenInfo {
                        chain_id: chain.chain_id,
                        symbol: t.symbol.clone(),
                        address: t.address.clone(),
                        decimals: t.decimals,
                    })
                    .collect();

                (
                    chain.chain_id,
                    ChainEntry {
                        name: chain.name.clone(),
                        native_symbol: chain.native_symbol.clone(),
                        native_decimals: chain.native_decimals,
                        tokens,
                    },
                )
            })
            .collect();

        let tools = settings
            .tools
            .iter()
            .map(|t| {
                (
                    t.key.to_lowercase(),
                    ToolInfo {
                        key: t.key.clone(),
                        name: t.name.clone(),
                        kind: t.kind.clone(),
                        preference: t.preference.clamp(0.0, 1.0),
                    },
                )
            })
            .collect();

        Self { chains, tools }
    }
}

impl Registry for ConfigRegistry {
    fn is_supported_chain(&self, chain_id: u64) -> bool {
        self.chains.contains_key(&chain_id)
    }

    fn chain_name(&self, chain_id: u64) -> Option<String> {
        self.chains.get(&chain_id).map(|c| c.name.clone())
    }

    fn native_symbol(&self, chain_id: u64) -> Option<String> {
        self.chains.get(&chain_id).map(|c| c.native_symbol.clone())
    }

    fn find_token(&self, chain_id: u64, symbol_or_address: &str) -> Option<TokenInfo> {
        let chain = self.chains.get(&chain_id)?;
        let needle = symbol_or_address.to_lowercase();

        if let Some(token) = chain
            .tokens
            .iter()
            .find(|t| t.symbol.to_lowercase() == needle || t.address.to_lowercase() == needle)
        {
            return Some(token.clone());
        }

        let is_native_address = crate::types::NATIVE_TOKEN_ADDRESSES.contains(&needle.as_str());
        if is_native_address || chain.native_symbol.to_lowercase() == needle {
            return Some(TokenInfo {
                chain_id,
                symbol: chain.native_symbol.clone(),
                address: crate::types::NATIVE_TOKEN_ADDRESSES[0].to_string(),
                decimals: chain.native_decimals,
            });
        }

        None
    }

    fn tool(&self, key: &str) -> Option<ToolInfo> {
        self.tools.get(&key.to_lowercase()).cloned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{ChainConfig, TokenConfig, ToolConfig};

    pub(crate) fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.chains.insert(
            "ethereum".to_string(),
            ChainConfig {
                chain_id: 1,
                name: "Ethereum".to_string(),
                rpc_urls: Vec::new(),
                native_symbol: "ETH".to_string(),
                native_decimals: 18,
                tokens: vec![TokenConfig {
                    symbol: "USDC".to_string(),
                    address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".to_string(),
                    decimals: 6,
                }],
                max_gas_price_gwei: 500,
                enabled: true,
            },
        );
        settings.chains.insert(
            "mantle".to_string(),
            ChainConfig {
                chain_id: 5000,
                name: "Mantle".to_string(),
                rpc_urls: Vec::new(),
                native_symbol: "MNT".to_string(),
                native_decimals: 18,
                tokens: Vec::new(),
                max_gas_price_gwei: 500,
                enabled: true,
            },
        );
        settings.tools.push(ToolConfig {
            key: "stargateV2".to_string(),
            name: "StargateV2".to_string(),
            kind: ToolKind::Bridge,
            preference: 0.9,
        });
        settings
    }

    #[test]
    fn resolves_tokens_by_symbol_address_and_native() {
        let registry = ConfigRegistry::from_settings(&test_settings());

        let usdc = registry.find_token(1, "usdc").unwrap();
        assert_eq!(usdc.decimals, 6);
        assert_eq!(
            registry
                .find_token(1, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")
                .unwrap()
                .symbol,
            "USDC"
        );
        assert_eq!(registry.find_token(5000, "MNT").unwrap().decimals, 18);
        assert!(registry.find_token(5000, "USDC").is_none());
        assert!(registry.find_token(10, "ETH").is_none());
    }

    #[test]
    fn unknown_tools_are_neutral() {
        let registry = ConfigRegistry::from_settings(&test_settings());
        assert_eq!(registry.tool_preference("STARGATEV2"), 0.9);
        assert_eq!(registry.tool_preference("hop"), 0.5);
        assert!(registry.is_supported_chain(5000));
        assert!(!registry.is_supported_chain(137));
    }
}
