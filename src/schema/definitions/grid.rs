//! Grid trading: buy and sell orders laid out evenly between two prices.

use crate::schema::types::{
    ConstraintRule, ControlType, FieldConfig, FieldConstraint, ParamSchemaField, SchemaValidator,
    StrategySchema,
};
use serde_json::json;

pub const GRID_TYPE: &str = "grid";

pub fn grid_schema() -> StrategySchema {
    StrategySchema::new(GRID_TYPE, "网格交易", "1.0.0")
        .with_description("在价格区间内等距挂单，低买高卖，适合震荡行情")
        .with_symbols(&["BTC/USDT", "ETH/USDT", "SOL/USDT"])
        .with_timeframes(&["1h", "4h", "1d"])
        // basic
        .with_field(
            ParamSchemaField::new("upperBound", "价格上限", ControlType::Number)
                .required()
                .order(1)
                .config(FieldConfig::at_least(0.0).with_unit("USDT"))
                .description("网格区间的最高价格")
                .constraint(FieldConstraint::new(
                    ConstraintRule::Gt,
                    "lowerBound",
                    "价格上限必须高于价格下限",
                )),
        )
        .with_field(
            ParamSchemaField::new("lowerBound", "价格下限", ControlType::Number)
                .required()
                .order(2)
                .config(FieldConfig::at_least(0.0).with_unit("USDT"))
                .description("网格区间的最低价格")
                .constraint(FieldConstraint::new(
                    ConstraintRule::Lt,
                    "upperBound",
                    "价格下限必须低于价格上限",
                )),
        )
        .with_field(
            ParamSchemaField::new("gridCount", "网格数量", ControlType::Slider)
                .default_value(json!(10))
                .required()
                .order(3)
                .config(FieldConfig::range(2.0, 200.0, 1.0).with_unit("格")),
        )
        .with_field(
            ParamSchemaField::new("investment", "投资金额", ControlType::Number)
                .default_value(json!(1000))
                .required()
                .order(4)
                .config(FieldConfig::at_least(10.0).with_unit("USDT")),
        )
        .with_field(
            ParamSchemaField::computed(
                "gridSpacing",
                "网格间距",
                "(upperBound - lowerBound) / gridCount",
                &["upperBound", "lowerBound", "gridCount"],
            )
            .order(5)
            .config(FieldConfig::default().with_unit("USDT").with_precision(4)),
        )
        .with_field(
            ParamSchemaField::computed(
                "amountPerGrid",
                "每格投资",
                "investment / gridCount",
                &["investment", "gridCount"],
            )
            .order(6)
            .config(FieldConfig::default().with_unit("USDT").with_precision(2)),
        )
        .with_field(
            ParamSchemaField::computed(
                "gridProfitPercent",
                "单格利润率",
                "gridSpacing / lowerBound * 100",
                &["gridSpacing", "lowerBound"],
            )
            .order(7)
            .config(FieldConfig::default().with_unit("%").with_precision(2))
            .description("不含手续费的单格理论收益"),
        )
        // advanced
        .with_field(
            ParamSchemaField::new("gridMode", "网格模式", ControlType::ButtonGroup)
                .default_value(json!("arithmetic"))
                .advanced()
                .group("advanced")
                .order(1)
                .config(FieldConfig::options(&[("等差", "arithmetic"), ("等比", "geometric")])),
        )
        // risk
        .with_field(
            ParamSchemaField::new("stopLossEnabled", "启用止损", ControlType::Toggle)
                .default_value(json!(false))
                .advanced()
                .group("risk")
                .order(1),
        )
        .with_field(
            ParamSchemaField::new("stopLossPrice", "止损价格", ControlType::Number)
                .advanced()
                .group("risk")
                .order(2)
                .config(FieldConfig::at_least(0.0).with_unit("USDT"))
                .show_when("stopLossEnabled === true")
                .constraint(FieldConstraint::new(
                    ConstraintRule::Lt,
                    "lowerBound",
                    "止损价格应低于价格下限",
                )),
        )
        .with_field(
            ParamSchemaField::new("takeProfitEnabled", "启用止盈", ControlType::Toggle)
                .default_value(json!(false))
                .advanced()
                .group("risk")
                .order(3),
        )
        .with_field(
            ParamSchemaField::new("takeProfitPrice", "止盈价格", ControlType::Number)
                .advanced()
                .group("risk")
                .order(4)
                .config(FieldConfig::at_least(0.0).with_unit("USDT"))
                .show_when("takeProfitEnabled === true")
                .constraint(FieldConstraint::new(
                    ConstraintRule::Gt,
                    "upperBound",
                    "止盈价格应高于价格上限",
                )),
        )
        .with_validator(SchemaValidator::error(
            "boundsValid",
            "upperBound > lowerBound",
            "网格上限必须高于下限",
        ))
        .with_validator(SchemaValidator::error(
            "minGridInvestment",
            "amountPerGrid >= 5",
            "每格投资额不能低于 5 USDT，请减少网格数量或增加投资",
        ))
        .with_validator(SchemaValidator::warning(
            "gridSpacingReasonable",
            "gridProfitPercent >= 0.1",
            "单格利润率过低，可能无法覆盖手续费",
        ))
        .with_validator(SchemaValidator::warning(
            "priceInRange",
            "currentPrice <= 0 || (currentPrice >= lowerBound && currentPrice <= upperBound)",
            "当前价格不在网格区间内，部分网格将不会立即成交",
        ))
}
