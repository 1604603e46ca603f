use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use super::types::{ClusterView, Member, MemberRole};
use crate::error::{ClusterError, ClusterResult};
use crate::transport::Transport;
use crate::transport::protocol::ClusterMessage;

/// Owner of the local [`ClusterView`].
///
/// All mutations go through [`MembershipService::update`], which swaps in a
/// new generation of the view; readers take `Arc` snapshots and never see a
/// half-applied change.
pub struct MembershipService {
    pub local_member: Member,
    view: RwLock<Arc<ClusterView>>,
    transport: Arc<dyn Transport>,
    discovery_timeout: Duration,
    joined: watch::Sender<bool>,
}

impl MembershipService {
    pub fn new(transport: Arc<dyn Transport>, discovery_timeout: Duration) -> Arc<Self> {
        let local_member = Member::new(transport.local_addr(), MemberRole::Joining);

        let mut view = ClusterView::default();
        view.members
            .insert(local_member.address, local_member.clone());

        let (joined, _) = watch::channel(false);

        Arc::new(Self {
            local_member,
            view: RwLock::new(Arc::new(view)),
            transport,
            discovery_timeout,
            joined,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_member.address
    }

    /// Immutable snapshot of the whole view, removed members included.
    pub fn snapshot(&self) -> Arc<ClusterView> {
        self.view.read().clone()
    }

    /// Live members in address order.
    pub fn members(&self) -> Vec<Member> {
        self.snapshot().live_members()
    }

    pub fn current_master(&self) -> Option<Member> {
        let view = self.snapshot();
        view.master_member().filter(|m| m.is_live()).cloned()
    }

    pub fn get_member(&self, address: &SocketAddr) -> Option<Member> {
        self.snapshot().get(address).cloned()
    }

    pub fn local_role(&self) -> MemberRole {
        self.snapshot()
            .get(&self.local_addr())
            .map(|member| member.role)
            .unwrap_or(MemberRole::Joining)
    }

    pub fn is_master(&self) -> bool {
        self.local_role() == MemberRole::Master
    }

    fn update<R>(&self, f: impl FnOnce(&mut ClusterView) -> R) -> R {
        let mut guard = self.view.write();
        let view = Arc::make_mut(&mut guard);
        let result = f(view);
        view.version += 1;
        result
    }

    /// Broadcasts a discovery probe and waits for the master's reply.
    ///
    /// If nobody answers within the discovery timeout the node founds a new
    /// cluster of one and becomes MASTER. Returns the role the node ended up
    /// with.
    pub async fn join_cluster(&self) -> MemberRole {
        let local = self.local_addr();
        let mut joined_rx = self.joined.subscribe();
        self.joined.send_replace(false);

        let probe = self.update(|view| {
            if let Some(me) = view.members.get_mut(&local) {
                me.role = MemberRole::Joining;
            }
            if view.master == Some(local) {
                view.master = None;
            }
            view.members.get(&local).cloned()
        });
        let member = probe.unwrap_or_else(|| self.local_member.clone());

        let reached = match self
            .transport
            .broadcast(&ClusterMessage::Discover { member })
            .await
        {
            Ok(reached) => reached,
            Err(e) => {
                tracing::warn!("Discovery broadcast failed: {}", e);
                0
            }
        };

        if reached > 0 {
            info!(
                "Sent discovery probe to {} target(s), waiting up to {:?}",
                reached, self.discovery_timeout
            );
            let replied = matches!(
                tokio::time::timeout(self.discovery_timeout, joined_rx.wait_for(|joined| *joined))
                    .await,
                Ok(Ok(_))
            );
            if replied {
                let role = self.local_role();
                info!(
                    "Joined cluster as {:?} ({} members, master={:?})",
                    role,
                    self.members().len(),
                    self.snapshot().master
                );
                return role;
            }
            info!("No discovery reply within {:?}", self.discovery_timeout);
        }

        self.found_cluster();
        MemberRole::Master
    }

    /// Makes the local node the master of a cluster of one.
    fn found_cluster(&self) {
        let local = self.local_addr();
        self.update(|view| view.set_master(local));
        self.joined.send_replace(true);
        info!("Founded new cluster, {} is MASTER", local);
    }

    /// Handles a DISCOVER probe carrying `member`.
    ///
    /// The master admits the joiner as FOLLOWER and pushes the refreshed view
    /// to every live member; a follower records the joiner and forwards the
    /// probe to its master.
    ///
    /// A JOINING probe from the address a follower holds as master means the
    /// master restarted and lost its state. Its previous incarnation is
    /// removed first, so the lowest survivor takes over and admits it like
    /// any other joiner.
    pub async fn on_discovery_message(&self, member: Member) -> ClusterResult<()> {
        let local = self.local_addr();
        if member.address == local {
            return Ok(());
        }

        if member.role == MemberRole::Joining
            && !self.is_master()
            && self.snapshot().master == Some(member.address)
        {
            info!("Master {} is rejoining, dropping its previous incarnation", member.address);
            self.remove_member(member.address, false).await;
        }

        let is_master = self.is_master();
        let joiner_role = if is_master {
            MemberRole::Follower
        } else {
            MemberRole::Joining
        };

        let (added, master) = self.update(|view| {
            let mut joiner = member.clone();
            joiner.role = joiner_role;
            let added = view.upsert(joiner);
            (added, view.master)
        });

        if added {
            info!("Discovered member {} ({:?})", member.address, member.id);
        }

        if is_master {
            self.push_view().await;
            return Ok(());
        }

        match master {
            Some(master) if master != local => {
                tracing::debug!("Forwarding discovery of {} to master {}", member.address, master);
                self.transport
                    .send_to(master, &ClusterMessage::Discover { member })
                    .await?;
            }
            _ => {
                tracing::debug!("No master known, not forwarding discovery of {}", member.address);
            }
        }

        Ok(())
    }

    /// Handles the membership list sent by a master.
    ///
    /// A reply naming a different master than the one we know is a
    /// membership conflict: the lower address wins. The winning side pushes
    /// its view so the loser demotes.
    pub async fn on_discovery_reply(
        &self,
        from: SocketAddr,
        members: Vec<Member>,
        master: Option<SocketAddr>,
    ) -> ClusterResult<()> {
        let local = self.local_addr();
        let claimed = master.unwrap_or(from);
        let view = self.snapshot();

        // A reply that already lists our master as one of its followers
        // comes from the cluster our master rejoined.
        let current_rejoined = view.master.is_some_and(|current| {
            current != local
                && members
                    .iter()
                    .any(|m| m.address == current && m.role == MemberRole::Follower)
        });

        if let Some(current) = view.master
            && current != claimed
            && view.is_live(&current)
            && !current_rejoined
        {
            let conflict = ClusterError::MembershipConflict {
                local: current,
                remote: claimed,
            };
            tracing::warn!("{}, resolving by lowest address", conflict);

            if current < claimed {
                if current == local {
                    self.absorb(members, local);
                    self.push_view().await;
                } else {
                    let loser = members
                        .iter()
                        .find(|m| m.address == claimed)
                        .cloned()
                        .unwrap_or_else(|| Member::new(claimed, MemberRole::Master));
                    self.transport
                        .send_to(current, &ClusterMessage::Discover { member: loser })
                        .await?;
                }
                return Ok(());
            }

            info!("Demoting: {} wins master tie-break over {}", claimed, current);
        }

        self.adopt(members, claimed);
        self.joined.send_replace(true);
        Ok(())
    }

    /// Replaces roles with the ones announced by `master`.
    fn adopt(&self, members: Vec<Member>, master: SocketAddr) {
        let local = self.local_addr();
        self.update(|view| {
            for member in members {
                if member.address == local {
                    continue;
                }
                match view.members.get_mut(&member.address) {
                    Some(existing) => {
                        existing.role = member.role;
                        existing.id = member.id;
                    }
                    None => {
                        view.members.insert(member.address, member);
                    }
                }
            }
            if let Some(me) = view.members.get_mut(&local) {
                me.role = MemberRole::Follower;
            }
            view.set_master(master);
        });
    }

    /// Merges another cluster's live members into ours as followers.
    fn absorb(&self, members: Vec<Member>, master: SocketAddr) {
        self.update(|view| {
            for mut member in members.into_iter().filter(|m| m.is_live()) {
                member.role = MemberRole::Follower;
                view.upsert(member);
            }
            view.set_master(master);
        });
    }

    /// Marks `address` REMOVED. With `replicate`, tells every other live
    /// member to do the same. If the removed member was master, the lowest
    /// remaining address takes over.
    ///
    /// Sends are not retried here; failures are logged and left to the next
    /// replication round to detect. Returns false if the member was not live.
    pub async fn remove_member(&self, address: SocketAddr, replicate: bool) -> bool {
        let local = self.local_addr();
        if address == local {
            tracing::warn!("Refusing to remove the local node {}", local);
            return false;
        }
        if !self.snapshot().is_live(&address) {
            return false;
        }

        let outcome = self.update(|view| {
            let was_master = view.master == Some(address);
            match view.members.get_mut(&address) {
                Some(member) if member.is_live() => {
                    member.role = MemberRole::Removed;
                }
                _ => return None,
            }
            let elected = if was_master { view.elect_lowest() } else { None };
            Some((elected, view.live_addresses()))
        });

        let Some((elected, survivors)) = outcome else {
            return false;
        };

        info!(
            "Removed member {} ({} live members remain)",
            address,
            survivors.len()
        );
        if let Some(new_master) = elected {
            info!("Master {} removed, {} is the new MASTER", address, new_master);
        }

        if replicate {
            let message = ClusterMessage::RemoveMember { address };
            for peer in survivors.into_iter().filter(|peer| *peer != local) {
                if let Err(e) = self.transport.send_to(peer, &message).await {
                    tracing::warn!("Failed to propagate removal of {} to {}: {}", address, peer, e);
                }
            }
        }

        true
    }

    /// Physically drops REMOVED members. Safe to call at any time: readers
    /// hold their own snapshots.
    pub fn purge_removed(&self) -> usize {
        if self.snapshot().members.values().all(|m| m.is_live()) {
            return 0;
        }

        let purged = self.update(|view| {
            let before = view.members.len();
            view.members.retain(|_, member| member.is_live());
            before - view.members.len()
        });

        tracing::debug!("Purged {} removed member(s)", purged);
        purged
    }

    /// Sends the current view to every other live member.
    async fn push_view(&self) {
        let view = self.snapshot();
        let local = self.local_addr();
        let message = ClusterMessage::DiscoverReply {
            members: view.members.values().cloned().collect(),
            master: view.master,
        };

        for peer in view.live_addresses().into_iter().filter(|peer| *peer != local) {
            if let Err(e) = self.transport.send_to(peer, &message).await {
                tracing::warn!("Failed to send membership list to {}: {}", peer, e);
            }
        }

        tracing::debug!(
            "Pushed view v{} ({} live members) to peers",
            view.version,
            view.live_addresses().len()
        );
    }
}
