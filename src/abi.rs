#[allow(clippy::too_many_arguments)]
pub mod viewer {
    alloy::sol!(
        /// Read-only protocol facade listing vaults and their live figures.
        #[derive(Debug)]
        #[sol(rpc)]
        interface IVaultViewer {
            struct VaultInfo {
                address vault;
                address asset;
                string symbol;
                uint8 decimals;
            }

            struct VaultMetrics {
                uint256 totalAssets;
                uint256 totalBorrowed;
                uint256 availableLiquidity;
                uint256 borrowRate;
                uint256 supplyRate;
            }

            function getVaults() external view returns (VaultInfo[] memory vaults);

            function getVaultMetrics(address vault) external view returns (VaultMetrics memory metrics);
        }
    );
}

#[allow(clippy::too_many_arguments)]
pub mod vault {
    alloy::sol!(
        /// Position lifecycle events emitted by every lending vault.
        #[derive(Debug)]
        interface ILendingVault {
            event PositionActivated(
                address indexed user,
                uint256 indexed positionId,
                uint256 indexed strategyId,
                uint8 side,
                uint256 principal,
                uint256 collateral
            );

            event PositionRepaid(
                address indexed user,
                uint256 indexed positionId,
                uint256 repaid,
                uint256 collateralReturned
            );

            event PositionLiquidated(
                address indexed user,
                uint256 indexed positionId,
                address liquidator,
                uint256 debtCovered,
                uint256 collateralSeized
            );
        }
    );
}
