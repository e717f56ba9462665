use std::path::PathBuf;

use alloy_primitives::{Address, U256};
use clap::{Args, Parser, Subcommand};
use market::ListingForm;
use market_core::TokenSymbol;

#[derive(Debug, Parser)]
#[command(name = "marketplace", version, about = "Browse, buy and list NFTs on the marketplace contract")]
pub struct Cli {
    /// Config file, created with defaults when missing
    #[arg(long, global = true, default_value = "config.json")]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Active listings, newest first, optionally filtered
    Listings {
        /// Matches token id, collection or seller, ignoring case
        query: Option<String>,
    },
    /// Poll listings until interrupted
    Watch,
    /// One listing by collection and token
    Listing(TokenRef),
    /// Token name and image
    Metadata(TokenRef),
    /// ETH and USDC balances
    Balance,
    /// Withdrawable proceeds
    Proceeds {
        #[arg(value_parser = parse_symbol)]
        symbol: TokenSymbol,
    },
    /// Buy a listed token
    Buy(TokenRef),
    /// List a token for sale
    List {
        #[command(flatten)]
        price: PriceArgs,
        /// Skip the NFT approval step
        #[arg(long)]
        no_approve: bool,
    },
    /// Approve the marketplace for a token
    ApproveNft(TokenRef),
    /// Change the price or payment token of a listing
    Update(PriceArgs),
    Cancel(TokenRef),
    Withdraw {
        #[arg(value_parser = parse_symbol)]
        symbol: TokenSymbol,
    },
    /// Print (or persist) the effective config
    Config {
        #[arg(long)]
        write: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct TokenRef {
    pub nft: Address,
    #[arg(value_parser = parse_token_id)]
    pub token_id: U256,
}

/// Listing input kept as typed; the form validator reports field errors.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct PriceArgs {
    pub nft: String,
    pub token_id: String,
    pub price: String,
    /// ETH or USDC
    pub token: String,
}

impl PriceArgs {
    pub fn form(&self) -> ListingForm {
        ListingForm {
            nft_address: self.nft.clone(),
            token_id: self.token_id.clone(),
            payment_token: self.token.clone(),
            price: self.price.clone(),
        }
    }
}

fn parse_token_id(s: &str) -> Result<U256, String> {
    U256::from_str_radix(s, 10).map_err(|_| format!("'{}' is not a token id", s))
}

fn parse_symbol(s: &str) -> Result<TokenSymbol, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(s: &str) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("marketplace").chain(s.split_whitespace()))
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn config_flag_anywhere() {
        let cli = parse("listings --config /tmp/m.json").unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/m.json"));
        assert_eq!(cli.command, Command::Listings { query: None });
        let cli = parse("--config /tmp/n.json balance").unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/n.json"));
        assert_eq!(parse("balance").unwrap().config, PathBuf::from("config.json"));
    }

    #[test]
    fn listings_take_an_optional_query() {
        assert_eq!(
            parse("listings 0xAbC").unwrap().command,
            Command::Listings {
                query: Some("0xAbC".to_string())
            }
        );
    }

    #[test]
    fn token_commands() {
        let cli = parse("buy 0x2222222222222222222222222222222222222222 42").unwrap();
        assert_eq!(
            cli.command,
            Command::Buy(TokenRef {
                nft: Address::repeat_byte(0x22),
                token_id: U256::from(42u8)
            })
        );
        assert!(parse("cancel 0x22 1").is_err());
        assert!(parse("cancel 0x2222222222222222222222222222222222222222").is_err());
        assert!(parse("cancel 0x2222222222222222222222222222222222222222 one").is_err());
    }

    #[test]
    fn list_defaults_to_approving() {
        let cli = parse("list 0x2222222222222222222222222222222222222222 1 0.5 eth").unwrap();
        match cli.command {
            Command::List { price, no_approve } => {
                assert!(!no_approve);
                let form = price.form();
                assert_eq!(form.price, "0.5");
                assert_eq!(form.payment_token, "eth");
                assert_eq!(form.token_id, "1");
            }
            other => panic!("unexpected {:?}", other),
        }
        let cli = parse("list 0x2222222222222222222222222222222222222222 1 0.5 ETH --no-approve").unwrap();
        assert!(matches!(cli.command, Command::List { no_approve: true, .. }));
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(parse("").is_err());
        assert!(parse("frobnicate").is_err());
        assert!(parse("withdraw DAI").is_err());
        assert_eq!(
            parse("withdraw usdc").unwrap().command,
            Command::Withdraw {
                symbol: TokenSymbol::Usdc
            }
        );
        assert_eq!(
            parse("approve-nft 0x2222222222222222222222222222222222222222 7").unwrap().command,
            Command::ApproveNft(TokenRef {
                nft: Address::repeat_byte(0x22),
                token_id: U256::from(7u8)
            })
        );
    }
}
