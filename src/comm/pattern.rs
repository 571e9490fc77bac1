//! Radix-k hypercube broadcast and reduce schedules
//!
//! Ranks are relative: the root is 0 and a participant set of `size` ranks is
//! numbered `0..size`. Callers shift real ranks so the root lands on 0. Write
//! a relative rank in base `radix`; its parent clears the lowest nonzero
//! digit, and its children set one digit below that position. Every rank is
//! reached after at most one hop per nonzero digit, so at most
//! `ceil(log_radix(size))` hops.

/// Ranks to receive from and send to, in execution order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommPattern {
    /// Ranks to receive from (at most one for a broadcast)
    pub recv_from: Vec<usize>,
    /// Ranks to send to
    pub send_to: Vec<usize>,
}

/// Lowest position holding a nonzero digit, and that digit
fn lowest_digit(rank: usize, radix: usize) -> (u32, usize) {
    let mut pos = 0;
    let mut r = rank;
    while r % radix == 0 {
        r /= radix;
        pos += 1;
    }
    (pos, r % radix)
}

fn children(size: usize, rank: usize, radix: usize) -> Vec<usize> {
    // positions below the lowest nonzero digit; every position for the root
    let top = if rank == 0 {
        let mut p = 0u32;
        while radix.pow(p) < size {
            p += 1;
        }
        p
    } else {
        lowest_digit(rank, radix).0
    };
    let mut out = Vec::new();
    // larger subtrees first
    for pos in (0..top).rev() {
        let step = radix.pow(pos);
        for d in 1..radix {
            let child = rank + d * step;
            if child < size {
                out.push(child);
            }
        }
    }
    out
}

fn parent(rank: usize, radix: usize) -> Option<usize> {
    if rank == 0 {
        return None;
    }
    let (pos, digit) = lowest_digit(rank, radix);
    Some(rank - digit * radix.pow(pos))
}

/// Broadcast schedule for relative `rank` among `size` participants
///
/// # Panics
///
/// Panics if `radix < 2` or `rank >= size`.
pub fn cube_bcast_pattern(size: usize, rank: usize, radix: usize) -> CommPattern {
    assert!(radix >= 2, "radix must be at least 2");
    assert!(rank < size, "rank {} outside participant set of {}", rank, size);
    CommPattern {
        recv_from: parent(rank, radix).into_iter().collect(),
        send_to: children(size, rank, radix),
    }
}

/// Reduce schedule for relative `rank`: the broadcast tree run backwards
///
/// Children are received smallest subtree first, then the partial result
/// goes to the parent.
pub fn cube_reduce_pattern(size: usize, rank: usize, radix: usize) -> CommPattern {
    let bcast = cube_bcast_pattern(size, rank, radix);
    let mut recv_from = bcast.send_to;
    recv_from.reverse();
    CommPattern {
        recv_from,
        send_to: bcast.recv_from,
    }
}
