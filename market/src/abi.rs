use alloy_sol_types::sol;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface INftMarketplace {
        struct Listing {
            uint256 price;
            address seller;
            address paymentToken;
        }

        struct TokenInfo {
            bool isSupported;
            uint8 decimals;
            string symbol;
        }

        function listItem(address nftAddress, uint256 tokenId, uint256 price, address paymentToken) external;
        function buyItem(address nftAddress, uint256 tokenId, address paymentToken) external payable;
        function updateListing(address nftAddress, uint256 tokenId, uint256 newPrice, address paymentToken) external;
        function cancelListing(address nftAddress, uint256 tokenId) external;
        function withdrawProceeds(address paymentToken) external;

        function getListing(address nftAddress, uint256 tokenId) external view returns (Listing memory listing);
        function getListingPriceInToken(address nftAddress, uint256 tokenId, address targetToken) external view returns (uint256 price);
        function getProceeds(address seller, address token) external view returns (uint256 amount);
        function isTokenSupportedPublic(address token) external view returns (bool supported);
        function getTokenInfo(address token) external view returns (TokenInfo memory info);
        function getOwner() external view returns (address owner);
        function NATIVE_TOKEN() external view returns (address token);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256 balance);
        function decimals() external view returns (uint8 decimals);
        function allowance(address owner, address spender) external view returns (uint256 remaining);
        function approve(address spender, uint256 amount) external returns (bool ok);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IERC721 {
        function tokenURI(uint256 tokenId) external view returns (string uri);
        function ownerOf(uint256 tokenId) external view returns (address owner);
        function approve(address to, uint256 tokenId) external;
    }
}
