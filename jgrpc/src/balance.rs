use std::{
    collections::BTreeMap,
    str::FromStr,
    sync::atomic::{AtomicUsize, Ordering},
};

use dashmap::DashMap;
use foldhash::fast::RandomState;
use md5::{Digest, Md5};
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// One provider address, as stored in the directory leaf name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("invalid endpoint: {s}"),
            )
        })?;
        if host.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("invalid endpoint: {s}"),
            ));
        }
        let port = port.parse::<u16>().map_err(|_| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("invalid endpoint port: {s}"),
            )
        })?;
        Ok(Self::new(host, port))
    }
}

/// Picks one provider out of a set for one call. `key` is the balancing
/// key, typically the interface name. An empty set yields `None`.
pub trait LoadBalancer: Send + Sync {
    fn select(&self, providers: &[Endpoint], key: &str) -> Option<Endpoint>;
}

/// Rotates through the set with one atomic counter per key, so rotation
/// of different interfaces stays independent.
#[derive(Default)]
pub struct RoundRobin {
    counters: DashMap<String, AtomicUsize, RandomState>,
}

impl LoadBalancer for RoundRobin {
    fn select(&self, providers: &[Endpoint], key: &str) -> Option<Endpoint> {
        match providers {
            [] => None,
            [only] => Some(only.clone()),
            _ => {
                let counter = self.counters.entry(key.to_string()).or_default();
                let index = counter.fetch_add(1, Ordering::Relaxed) % providers.len();
                Some(providers[index].clone())
            }
        }
    }
}

/// Uniform random pick.
#[derive(Default)]
pub struct Random;

impl LoadBalancer for Random {
    fn select(&self, providers: &[Endpoint], _key: &str) -> Option<Endpoint> {
        match providers {
            [] => None,
            [only] => Some(only.clone()),
            _ => {
                let index = thread_rng().gen_range(0..providers.len());
                Some(providers[index].clone())
            }
        }
    }
}

/// Number of virtual nodes placed on the ring per provider.
const VIRTUAL_NODES: usize = 160;

/// Consistent hashing: a stable key maps to a stable provider, and
/// removing one provider remaps only the keys that hashed to it. The
/// ring is rebuilt from the passed-in set on every call, since the set
/// itself comes from per-call discovery.
#[derive(Default)]
pub struct ConsistentHash;

fn ring_position(key: &str) -> u64 {
    let digest = Md5::digest(key.as_bytes());
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(first)
}

impl LoadBalancer for ConsistentHash {
    fn select(&self, providers: &[Endpoint], key: &str) -> Option<Endpoint> {
        match providers {
            [] => None,
            [only] => Some(only.clone()),
            _ => {
                let mut ring: BTreeMap<u64, &Endpoint> = BTreeMap::new();
                for provider in providers {
                    for i in 0..VIRTUAL_NODES {
                        ring.insert(ring_position(&format!("{provider}#{i}")), provider);
                    }
                }

                let position = ring_position(key);
                // First virtual node at or clockwise from the position,
                // wrapping to the ring minimum.
                ring.range(position..)
                    .next()
                    .or_else(|| ring.iter().next())
                    .map(|(_, provider)| (*provider).clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn providers(k: usize) -> Vec<Endpoint> {
        (0..k)
            .map(|i| Endpoint::new("10.0.0.1", 9000 + i as u16))
            .collect()
    }

    #[test]
    fn test_endpoint_parse_and_display() {
        let ep: Endpoint = "192.168.1.5:9000".parse().unwrap();
        assert_eq!(ep, Endpoint::new("192.168.1.5", 9000));
        assert_eq!(ep.to_string(), "192.168.1.5:9000");

        assert!("no-port".parse::<Endpoint>().is_err());
        assert!(":9000".parse::<Endpoint>().is_err());
        assert!("host:notaport".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_empty_set_yields_none() {
        let set: Vec<Endpoint> = Vec::new();
        assert!(RoundRobin::default().select(&set, "svc").is_none());
        assert!(Random::default().select(&set, "svc").is_none());
        assert!(ConsistentHash::default().select(&set, "svc").is_none());
    }

    #[test]
    fn test_single_provider_short_circuits() {
        let set = providers(1);
        for balancer in [
            Box::new(RoundRobin::default()) as Box<dyn LoadBalancer>,
            Box::new(Random),
            Box::new(ConsistentHash),
        ] {
            assert_eq!(balancer.select(&set, "svc").unwrap(), set[0]);
        }
    }

    #[test]
    fn test_round_robin_fairness() {
        let set = providers(3);
        let balancer = RoundRobin::default();

        let mut counts: HashMap<Endpoint, usize> = HashMap::new();
        for _ in 0..30 {
            *counts.entry(balancer.select(&set, "svc").unwrap()).or_default() += 1;
        }
        for provider in &set {
            assert_eq!(counts[provider], 10);
        }
    }

    #[test]
    fn test_round_robin_strict_rotation() {
        let set = providers(2);
        let balancer = RoundRobin::default();
        let picks: Vec<Endpoint> = (0..6)
            .map(|_| balancer.select(&set, "svc").unwrap())
            .collect();
        assert_eq!(
            picks,
            vec![
                set[0].clone(),
                set[1].clone(),
                set[0].clone(),
                set[1].clone(),
                set[0].clone(),
                set[1].clone()
            ]
        );
    }

    #[test]
    fn test_round_robin_counters_are_per_key() {
        let set = providers(2);
        let balancer = RoundRobin::default();
        assert_eq!(balancer.select(&set, "a").unwrap(), set[0]);
        // A different interface starts its own rotation.
        assert_eq!(balancer.select(&set, "b").unwrap(), set[0]);
        assert_eq!(balancer.select(&set, "a").unwrap(), set[1]);
    }

    #[test]
    fn test_random_stays_in_set() {
        let set = providers(4);
        let balancer = Random;
        for _ in 0..100 {
            assert!(set.contains(&balancer.select(&set, "svc").unwrap()));
        }
    }

    #[test]
    fn test_consistent_hash_is_stable() {
        let set = providers(5);
        let balancer = ConsistentHash;
        for key in ["demo.Hello", "demo.Greet", "a.b.C"] {
            let first = balancer.select(&set, key).unwrap();
            for _ in 0..10 {
                assert_eq!(balancer.select(&set, key).unwrap(), first);
            }
        }
    }

    #[test]
    fn test_consistent_hash_remap_is_bounded() {
        let full = providers(4);
        let balancer = ConsistentHash;

        let keys: Vec<String> = (0..200).map(|i| format!("service.Interface{i}")).collect();
        let before: Vec<Endpoint> = keys
            .iter()
            .map(|k| balancer.select(&full, k).unwrap())
            .collect();

        let removed = full[2].clone();
        let reduced: Vec<Endpoint> = full
            .iter()
            .filter(|e| **e != removed)
            .cloned()
            .collect();

        let mut moved = 0;
        for (key, old) in keys.iter().zip(&before) {
            let new = balancer.select(&reduced, key).unwrap();
            if *old == removed {
                // Keys on the removed provider must land somewhere else.
                assert_ne!(new, removed);
            } else if new != *old {
                moved += 1;
            }
        }
        // Only keys that hashed to the removed provider should move.
        assert_eq!(moved, 0);
    }

    #[test]
    fn test_ring_position_is_md5_prefix() {
        // Independently computable: first 8 digest bytes, big-endian.
        let digest = Md5::digest(b"demo.Hello");
        let mut first = [0u8; 8];
        first.copy_from_slice(&digest[..8]);
        assert_eq!(ring_position("demo.Hello"), u64::from_be_bytes(first));
    }
}
