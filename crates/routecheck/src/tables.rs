//! Table name constants for route_check

use serde_json::json;

/// APPL_DB ROUTE_TABLE (intended routes)
pub const APP_ROUTE_TABLE_NAME: &str = "ROUTE_TABLE";

/// APPL_DB INTF_TABLE (interface addresses)
pub const APP_INTF_TABLE_NAME: &str = "INTF_TABLE";

/// APPL_DB NEIGH_TABLE
pub const APP_NEIGH_TABLE_NAME: &str = "NEIGH_TABLE";

/// APPL_DB VNET_ROUTE_TABLE
pub const APP_VNET_RT_TABLE_NAME: &str = "VNET_ROUTE_TABLE";

/// APPL_DB VNET_ROUTE_TUNNEL_TABLE
pub const APP_VNET_RT_TUNNEL_TABLE_NAME: &str = "VNET_ROUTE_TUNNEL_TABLE";

/// ASIC_DB table holding every SAI object
pub const ASIC_STATE_TABLE_NAME: &str = "ASIC_STATE";

/// Key prefix of route entries inside ASIC_STATE
pub const ASIC_ROUTE_ENTRY_PREFIX: &str = "SAI_OBJECT_TYPE_ROUTE_ENTRY";

/// CONFIG_DB DEVICE_METADATA table
pub const CFG_DEVICE_METADATA_TABLE_NAME: &str = "DEVICE_METADATA";

/// CONFIG_DB MUX_CABLE table
pub const CFG_MUX_CABLE_TABLE_NAME: &str = "MUX_CABLE";

/// Only key of DEVICE_METADATA
pub const DEVICE_METADATA_LOCALHOST_KEY: &str = "localhost";

/// Prefix of VRF-qualified ROUTE_TABLE keys
pub const VRF_NAME_PREFIX: &str = "Vrf";

/// DEVICE_METADATA subtype value for dual-ToR devices (compared case-insensitively)
pub const DUAL_TOR_SUBTYPE: &str = "dualtor";

/// Field names used in the tables above
pub mod fields {
    // ROUTE_TABLE
    pub const IFNAME: &str = "ifname";
    pub const NEXTHOP: &str = "nexthop";

    // NEIGH_TABLE
    pub const NEIGH: &str = "neigh";

    // DEVICE_METADATA
    pub const SUBTYPE: &str = "subtype";
    pub const SUPPRESS_FIB_PENDING: &str = "suppress-fib-pending";

    // MUX_CABLE
    pub const SOC_IPV4: &str = "soc_ipv4";
    pub const SOC_IPV6: &str = "soc_ipv6";
}

/// Builds the ASIC_DB key for a route entry with the given destination.
///
/// Switch and VR object ids are fixed; readers only look at `dest`.
pub fn asic_route_entry_key(dest: &str) -> String {
    let entry = json!({
        "dest": dest,
        "switch_id": "oid:0x21000000000000",
        "vr": "oid:0x3000000000022",
    });
    format!("{}:{}:{}", ASIC_STATE_TABLE_NAME, ASIC_ROUTE_ENTRY_PREFIX, entry)
}
