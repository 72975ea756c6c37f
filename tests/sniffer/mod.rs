//! URL sniffer tests.
