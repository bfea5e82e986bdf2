pub mod completion;
pub mod domain;
pub mod ports;
pub mod sequential;

pub use completion::{CompletionDelta, CompletionSet, DeltaId, OptimisticCompletions};
pub use domain::{
    AnalyticsSession, BookmarkId, CompletionStats, Container, ContainerId, CorpusSessionStart,
    Edition, Item, ItemId, ItemRef, LastPosition, ListeningStart, MediaEvent, NextItem,
    PendingAction, PendingIntent, PlaybackStatus, ResumeMarker, SequentialProgress,
};
pub use ports::{
    AnalyticsService, AudioFetcher, BookmarkService, ClientStore, CorpusService, MediaElement,
    MediaSource, PortError, PortResult, ProgressService,
};
