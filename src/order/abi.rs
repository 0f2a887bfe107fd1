//! Solidity bindings for the limit order protocol, escrow factory and resolver

use alloy_sol_types::sol;

sol! {
    /// Limit order as hashed by the limit order protocol (EIP-712 type `Order`)
    #[derive(Debug, PartialEq, Eq)]
    struct Order {
        uint256 salt;
        address maker;
        address receiver;
        address makerAsset;
        address takerAsset;
        uint256 makingAmount;
        uint256 takingAmount;
        uint256 makerTraits;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Immutables {
        bytes32 orderHash;
        bytes32 hashlock;
        uint256 maker;
        uint256 taker;
        uint256 token;
        uint256 amount;
        uint256 safetyDeposit;
        uint256 timelocks;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct DstImmutablesComplement {
        uint256 maker;
        uint256 amount;
        uint256 token;
        uint256 safetyDeposit;
        uint256 chainId;
    }

    /// Emitted by the escrow factory when the resolver fills an order
    event SrcEscrowCreated(Immutables srcImmutables, DstImmutablesComplement dstImmutablesComplement);

    /// Resolver entry points
    function deploySrc(
        Immutables immutables,
        Order order,
        bytes32 r,
        bytes32 vs,
        uint256 amount,
        uint256 takerTraits,
        bytes args
    ) external payable;

    function withdraw(address escrow, bytes32 secret, Immutables immutables) external;

    /// Escrow factory implementation pointer
    function ESCROW_SRC_IMPLEMENTATION() external view returns (address);
}
