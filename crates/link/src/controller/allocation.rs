//! Sharing one carrier's packets between the terminals bound to it

use satdama_core::{TerminalId, VolumePkt};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RbdcShare {
    pub terminal_id: TerminalId,
    pub request_pkt: u32,
    pub max_pkt: u32,
    pub credit: f64,
    pub granted_pkt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VbdcShare {
    pub terminal_id: TerminalId,
    pub request_pkt: VolumePkt,
    pub granted_pkt: VolumePkt,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FcaShare {
    pub terminal_id: TerminalId,
    pub credit: f64,
    pub quantum_pkt: u32,
    pub granted_pkt: u32,
}

/// Integer fair share with fractional credit; returns the packets left.
///
/// When the carrier is congested every request is scaled by the same
/// factor, the truncated fractions are banked as credit and terminals
/// holding more than one packet of credit get one extra packet each,
/// highest credit first.
pub(crate) fn share_rbdc(shares: &mut [RbdcShare], mut remaining: u32) -> u32 {
    let total: u64 = shares.iter().map(|share| share.request_pkt as u64).sum();
    if total == 0 || remaining == 0 {
        return remaining;
    }
    let fair_share = (total as f64 / remaining as f64).max(1.0);

    for share in shares.iter_mut() {
        let fair_pkt = share.request_pkt as f64 / fair_share;
        let granted = (fair_pkt.floor() as u32).min(remaining);
        share.granted_pkt = granted;
        remaining -= granted;
        if fair_share > 1.0 {
            share.credit += fair_pkt - granted as f64;
        }
    }

    if fair_share > 1.0 {
        let mut order: Vec<usize> = (0..shares.len()).collect();
        order.sort_by(|a, b| shares[*b].credit.total_cmp(&shares[*a].credit));
        for index in order {
            if remaining == 0 {
                break;
            }
            let share = &mut shares[index];
            if share.credit > 1.0 && share.max_pkt.saturating_sub(share.granted_pkt) > 1 {
                share.granted_pkt += 1;
                share.credit -= 1.0;
                remaining -= 1;
            }
        }
    }
    remaining
}

/// Smallest requests first, the last one served may be partial.
pub(crate) fn share_vbdc(shares: &mut [VbdcShare], mut remaining: u32) -> u32 {
    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by_key(|index| shares[*index].request_pkt);
    for index in order {
        if remaining == 0 {
            break;
        }
        let share = &mut shares[index];
        if share.request_pkt == 0 {
            continue;
        }
        share.granted_pkt = share.request_pkt.min(remaining);
        remaining -= share.granted_pkt;
    }
    remaining
}

/// One quantum per terminal, highest RBDC credit first.
pub(crate) fn share_fca(shares: &mut [FcaShare], mut remaining: u32) -> u32 {
    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|a, b| shares[*b].credit.total_cmp(&shares[*a].credit));
    for index in order {
        let share = &mut shares[index];
        if share.quantum_pkt == 0 || remaining < share.quantum_pkt {
            continue;
        }
        share.granted_pkt = share.quantum_pkt;
        remaining -= share.quantum_pkt;
    }
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rbdc(requests: &[u32]) -> Vec<RbdcShare> {
        requests
            .iter()
            .enumerate()
            .map(|(index, request)| RbdcShare {
                terminal_id: index as TerminalId + 1,
                request_pkt: *request,
                max_pkt: 1000,
                credit: 0.0,
                granted_pkt: 0,
            })
            .collect()
    }

    fn vbdc(requests: &[u32]) -> Vec<VbdcShare> {
        requests
            .iter()
            .enumerate()
            .map(|(index, request)| VbdcShare {
                terminal_id: index as TerminalId + 1,
                request_pkt: *request,
                granted_pkt: 0,
            })
            .collect()
    }

    #[test]
    fn test_rbdc_congested_even_split() {
        let mut shares = rbdc(&[60, 60]);
        let remaining = share_rbdc(&mut shares, 100);
        assert_eq!(remaining, 0);
        assert_eq!(shares[0].granted_pkt, 50);
        assert_eq!(shares[1].granted_pkt, 50);
        assert_eq!(shares[0].credit, 0.0);
    }

    #[test]
    fn test_rbdc_served_in_full_below_capacity() {
        let mut shares = rbdc(&[10, 25, 0, 7]);
        let remaining = share_rbdc(&mut shares, 100);
        assert_eq!(remaining, 58);
        let granted: Vec<u32> = shares.iter().map(|s| s.granted_pkt).collect();
        assert_eq!(granted, vec![10, 25, 0, 7]);
        assert!(shares.iter().all(|s| s.credit == 0.0));
    }

    #[test]
    fn test_rbdc_never_exceeds_capacity() {
        for capacity in [1u32, 3, 7, 10, 33, 99] {
            let mut shares = rbdc(&[13, 40, 7, 29, 1]);
            for share in shares.iter_mut() {
                share.credit = 1.5;
            }
            let remaining = share_rbdc(&mut shares, capacity);
            let granted: u32 = shares.iter().map(|s| s.granted_pkt).sum();
            assert_eq!(granted + remaining, capacity);
        }
    }

    #[test]
    fn test_rbdc_credit_pass() {
        // 3 terminals asking 10 on 20 packets: 6 each, 2 left
        let mut shares = rbdc(&[10, 10, 10]);
        shares[1].credit = 0.8;
        shares[2].credit = 0.5;
        let remaining = share_rbdc(&mut shares, 20);
        // credits: 0.667, 1.467, 1.167
        assert_eq!(remaining, 0);
        let granted: Vec<u32> = shares.iter().map(|s| s.granted_pkt).collect();
        assert_eq!(granted, vec![6, 7, 7]);
        assert!((shares[1].credit - 0.4667).abs() < 1e-3);
    }

    #[test]
    fn test_rbdc_credit_respects_max() {
        let mut shares = rbdc(&[10, 10, 10]);
        shares[1].credit = 0.8;
        shares[1].max_pkt = 7;
        share_rbdc(&mut shares, 20);
        assert_eq!(shares[1].granted_pkt, 6);
    }

    #[test]
    fn test_vbdc_smallest_first() {
        let mut shares = vbdc(&[50, 10, 30]);
        let remaining = share_vbdc(&mut shares, 60);
        assert_eq!(remaining, 0);
        let granted: Vec<u32> = shares.iter().map(|s| s.granted_pkt).collect();
        assert_eq!(granted, vec![20, 10, 30]);
    }

    #[test]
    fn test_vbdc_monotonic_in_capacity() {
        let requests = [17u32, 3, 40, 0, 25];
        let mut previous = vec![0u32; requests.len()];
        for capacity in 0..100u32 {
            let mut shares = vbdc(&requests);
            share_vbdc(&mut shares, capacity);
            for (index, share) in shares.iter().enumerate() {
                assert!(share.granted_pkt >= previous[index]);
                previous[index] = share.granted_pkt;
            }
        }
        assert_eq!(previous, requests.to_vec());
    }

    #[test]
    fn test_fca_full_quanta_only() {
        let mut shares: Vec<FcaShare> = [0.2, 1.4, 0.9]
            .iter()
            .enumerate()
            .map(|(index, credit)| FcaShare {
                terminal_id: index as TerminalId,
                credit: *credit,
                quantum_pkt: 4,
                granted_pkt: 0,
            })
            .collect();
        let remaining = share_fca(&mut shares, 10);
        assert_eq!(remaining, 2);
        let granted: Vec<u32> = shares.iter().map(|s| s.granted_pkt).collect();
        assert_eq!(granted, vec![0, 4, 4]);
    }
}
