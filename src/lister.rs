//! Generic traversal of server-paginated collections.
//!
//! A [`Lister`] visits every element of a collection exactly once, in
//! server order, one page at a time. The first page comes from the
//! query-based entry point (with an optional page-size override); every
//! continuation follows the page's `next` relation link verbatim, since
//! that URL already encodes the original query. Any transport or decoding
//! error aborts the whole traversal — retries belong to the transport
//! layer, not here.

use crate::api::{Api, ApiError, ListQuery, PageSource};
use crate::meta::relation;
use crate::resources::{
    ApplicationItem, ClusterItem, ExperimentItem, ItemPage, RecommendationItem, ScenarioItem,
    TrialItem,
};
use tokio_util::sync::CancellationToken;

/// Stateless pagination helper bound to an API handle.
#[derive(Debug, Clone)]
pub struct Lister<A> {
    api: A,
    page_size: Option<u32>,
}

impl<A: Api> Lister<A> {
    pub fn new(api: A) -> Self {
        Lister {
            api,
            page_size: None,
        }
    }

    /// Overrides the server page size on the initial query of each
    /// traversal. Continuation pages are unaffected.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    fn initial_query(&self) -> ListQuery {
        ListQuery {
            limit: self.page_size,
        }
    }

    /// Core page loop: visit the items of `page`, then follow `next`
    /// links until none remains. A visitor error propagates immediately;
    /// the cancellation token is checked after each item.
    async fn drain_pages<P, E, F>(
        &self,
        cancel: &CancellationToken,
        mut page: P,
        mut visit: F,
    ) -> Result<(), E>
    where
        A: PageSource<P>,
        P: ItemPage,
        E: From<ApiError>,
        F: FnMut(P::Item) -> Result<(), E>,
    {
        loop {
            for item in page.take_items() {
                visit(item)?;
                if cancel.is_cancelled() {
                    return Err(ApiError::Cancelled.into());
                }
            }
            match page.metadata().link(relation::NEXT) {
                Some(next) => {
                    tracing::trace!(next = %next, "Following pagination link");
                    page = self.api.fetch_page(&next).await.map_err(E::from)?;
                }
                None => return Ok(()),
            }
        }
    }

    pub async fn for_each_application<E, F>(
        &self,
        cancel: &CancellationToken,
        visit: F,
    ) -> Result<(), E>
    where
        E: From<ApiError>,
        F: FnMut(ApplicationItem) -> Result<(), E>,
    {
        let query = self.initial_query();
        let first = self.api.list_applications(&query).await.map_err(E::from)?;
        self.drain_pages(cancel, first, visit).await
    }

    pub async fn for_each_scenario<E, F>(
        &self,
        cancel: &CancellationToken,
        application: &str,
        visit: F,
    ) -> Result<(), E>
    where
        E: From<ApiError>,
        F: FnMut(ScenarioItem) -> Result<(), E>,
    {
        let query = self.initial_query();
        let first = self
            .api
            .list_scenarios(application, &query)
            .await
            .map_err(E::from)?;
        self.drain_pages(cancel, first, visit).await
    }

    pub async fn for_each_cluster<E, F>(
        &self,
        cancel: &CancellationToken,
        visit: F,
    ) -> Result<(), E>
    where
        E: From<ApiError>,
        F: FnMut(ClusterItem) -> Result<(), E>,
    {
        let query = self.initial_query();
        let first = self.api.list_clusters(&query).await.map_err(E::from)?;
        self.drain_pages(cancel, first, visit).await
    }

    pub async fn for_each_experiment<E, F>(
        &self,
        cancel: &CancellationToken,
        visit: F,
    ) -> Result<(), E>
    where
        E: From<ApiError>,
        F: FnMut(ExperimentItem) -> Result<(), E>,
    {
        let query = self.initial_query();
        let first = self.api.list_experiments(&query).await.map_err(E::from)?;
        self.drain_pages(cancel, first, visit).await
    }

    pub async fn for_each_trial<E, F>(
        &self,
        cancel: &CancellationToken,
        experiment: &str,
        visit: F,
    ) -> Result<(), E>
    where
        E: From<ApiError>,
        F: FnMut(TrialItem) -> Result<(), E>,
    {
        let query = self.initial_query();
        let first = self
            .api
            .list_trials(experiment, &query)
            .await
            .map_err(E::from)?;
        self.drain_pages(cancel, first, visit).await
    }

    pub async fn for_each_recommendation<E, F>(
        &self,
        cancel: &CancellationToken,
        application: &str,
        visit: F,
    ) -> Result<(), E>
    where
        E: From<ApiError>,
        F: FnMut(RecommendationItem) -> Result<(), E>,
    {
        let query = self.initial_query();
        let first = self
            .api
            .list_recommendations(application, &query)
            .await
            .map_err(E::from)?;
        self.drain_pages(cancel, first, visit).await
    }

    /// Looks up an application by a human-supplied string that may be its
    /// canonical name or its display title.
    ///
    /// The exact-name lookup runs first; only a `NotFound` result triggers
    /// a full linear scan comparing display titles. Multiple title matches
    /// are not disambiguated — the last match wins. If no title matches
    /// either, the original `NotFound` is returned.
    pub async fn get_application_by_name_or_title(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<ApplicationItem, ApiError> {
        match self.api.get_application(name).await {
            Ok(app) => Ok(app),
            Err(ApiError::NotFound) => {
                let mut found = None;
                self.for_each_application::<ApiError, _>(cancel, |app| {
                    if app.title == name {
                        found = Some(app);
                    }
                    Ok(())
                })
                .await?;
                found.ok_or(ApiError::NotFound)
            }
            Err(e) => Err(e),
        }
    }
}
