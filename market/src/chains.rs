use alloy_primitives::TxHash;

pub const MAINNET: u64 = 1;
pub const LOCAL_CHAIN_ID: u64 = 31337;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chain {
    pub id: u64,
    pub name: &'static str,
    /// Transaction URL prefix; `None` for chains without an explorer.
    pub explorer_tx: Option<&'static str>,
}

const fn chain(id: u64, name: &'static str, explorer_tx: &'static str) -> Chain {
    Chain {
        id,
        name,
        explorer_tx: Some(explorer_tx),
    }
}

static CHAINS: &[Chain] = &[
    chain(1, "Ethereum", "https://etherscan.io/tx/"),
    chain(11155111, "Sepolia", "https://sepolia.etherscan.io/tx/"),
    chain(42161, "Arbitrum One", "https://arbiscan.io/tx/"),
    chain(421613, "Arbitrum Goerli", "https://goerli.arbiscan.io/tx/"),
    chain(10, "OP Mainnet", "https://optimistic.etherscan.io/tx/"),
    chain(420, "Optimism Goerli", "https://goerli-optimism.etherscan.io/tx/"),
    chain(8453, "Base", "https://basescan.org/tx/"),
    chain(84531, "Base Goerli", "https://goerli.basescan.org/tx/"),
    chain(137, "Polygon", "https://polygonscan.com/tx/"),
    chain(80001, "Polygon Mumbai", "https://mumbai.polygonscan.com/tx/"),
    chain(43114, "Avalanche", "https://snowtrace.io/tx/"),
    chain(43113, "Avalanche Fuji", "https://testnet.snowtrace.io/tx/"),
    chain(59144, "Linea", "https://lineascan.build/tx/"),
    chain(59140, "Linea Goerli", "https://goerli.lineascan.build/tx/"),
    chain(56, "BNB Smart Chain", "https://bscscan.com/tx/"),
    chain(97, "BNB Smart Chain Testnet", "https://testnet.bscscan.com/tx/"),
];

static LOCAL: Chain = Chain {
    id: LOCAL_CHAIN_ID,
    name: "Hardhat",
    explorer_tx: None,
};

pub fn supported_chains(enable_testnets: bool) -> Vec<Chain> {
    let mut out = CHAINS.to_vec();
    if enable_testnets {
        out.push(LOCAL);
    }
    out
}

pub fn find_chain(id: u64) -> Option<Chain> {
    if id == LOCAL_CHAIN_ID {
        return Some(LOCAL);
    }
    CHAINS.iter().find(|c| c.id == id).copied()
}

pub fn is_supported(id: u64, enable_testnets: bool) -> bool {
    supported_chains(enable_testnets).iter().any(|c| c.id == id)
}

/// Explorer link for a transaction. Unknown chains use the mainnet explorer;
/// the local chain has none.
pub fn explorer_tx_url(chain_id: u64, hash: TxHash) -> Option<String> {
    let prefix = match find_chain(chain_id) {
        Some(c) => c.explorer_tx?,
        None => CHAINS[0].explorer_tx?,
    };
    Some(format!("{}{}", prefix, hash))
}
