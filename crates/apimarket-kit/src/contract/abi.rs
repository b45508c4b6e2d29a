//! Marketplace contract ABI.

use alloy_sol_types::sol;

sol! {
    /// The deployed API marketplace contract.
    ///
    /// `apis(id)` is the public getter of the listing mapping and returns the
    /// struct members as separate values.
    interface IApiMarketplace {
        function apiIdCounter() external view returns (uint256);

        function apis(uint256 id)
            external
            view
            returns (
                string name,
                uint256 pricePerRequest,
                uint256 subscriptionPrice,
                uint256 subscriptionDuration,
                uint256 totalPurchases,
                bool isActive
            );

        function registerAPI(
            string name,
            uint256 pricePerRequest,
            uint256 subscriptionPrice,
            uint256 subscriptionDuration
        ) external;

        function approveAndPurchaseAPIAccess(uint256 apiId, uint256 numberOfRequests) external;

        function approveAndPurchaseSubscription(uint256 apiId) external;

        function useAPIAccess(uint256 apiId) external;

        function withdrawEarnings() external;

        function getUserTokenBalance(address user) external view returns (uint256);
    }
}
