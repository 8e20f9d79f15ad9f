use crate::envelope::Envelope;
use crate::tracker::StatusChange;
use crate::types::NodeId;

use super::{DeliveredMessage, ProtocolEvent};

/// Effet a executer par la boucle runtime.
///
/// Les handlers de RuntimeState decrivent leurs decisions sous forme de
/// valeurs ; rien ne part sur le reseau tant que l'executor ne les a pas
/// consommees. C'est ce decoupage qui permet de tester toute la logique
/// protocole sans transport.
#[derive(Debug)]
pub enum RuntimeEffect {
    /// Remonter un message (dechiffre, verifie) a l'application.
    DeliverMessage(DeliveredMessage),

    /// Remonter une transition de statut d'un message sortant.
    StatusChange(StatusChange),

    /// Remonter un evenement protocole (presence, groupes, backup...).
    Emit(ProtocolEvent),

    /// Emettre une enveloppe ; l'executor choisit le premier hop
    /// (tete de la chaine via, sinon le destinataire).
    SendEnvelope(Envelope),

    /// Emettre une enveloppe vers un noeud impose, sans consulter
    /// la chaine via (relais, livraison de backup).
    SendEnvelopeTo { target: NodeId, envelope: Envelope },

    /// Tenter l'envoi, puis derouler la branche correspondant au
    /// resultat du transport. Seul moyen pour la logique pure de
    /// reagir a un echec reseau — c'est la porte d'entree du backup.
    SendWithBackupFallback {
        envelope: Envelope,
        on_success: Vec<RuntimeEffect>,
        on_failure: Vec<RuntimeEffect>,
    },
}
