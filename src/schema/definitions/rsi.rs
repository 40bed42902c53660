//! RSI reversal: buy oversold, sell overbought.

use crate::schema::types::{
    ConstraintRule, ControlType, FieldConfig, FieldConstraint, ParamSchemaField, SchemaValidator,
    StrategySchema,
};
use serde_json::json;

pub const RSI_REVERSAL_TYPE: &str = "rsi_reversal";

pub fn rsi_reversal_schema() -> StrategySchema {
    StrategySchema::new(RSI_REVERSAL_TYPE, "RSI 反转", "1.0.0")
        .with_description("RSI 进入超卖区间时买入，进入超买区间时卖出")
        .with_symbols(&["BTC/USDT", "ETH/USDT"])
        .with_timeframes(&["15m", "1h", "4h"])
        .with_field(
            ParamSchemaField::new("orderAmount", "单笔金额", ControlType::Number)
                .default_value(json!(100))
                .required()
                .order(1)
                .config(FieldConfig::at_least(10.0).with_unit("USDT")),
        )
        .with_field(
            ParamSchemaField::new("timeframe", "K线周期", ControlType::Select)
                .default_value(json!("1h"))
                .order(2)
                .config(FieldConfig::options(&[
                    ("15分钟", "15m"),
                    ("1小时", "1h"),
                    ("4小时", "4h"),
                    ("1天", "1d"),
                ])),
        )
        .with_field(
            ParamSchemaField::new("rsiPeriod", "RSI 周期", ControlType::Slider)
                .default_value(json!(14))
                .required()
                .group("entry")
                .order(1)
                .config(FieldConfig::range(2.0, 100.0, 1.0)),
        )
        .with_field(
            ParamSchemaField::new("rsiOverbought", "超买阈值", ControlType::HeatmapSlider)
                .default_value(json!(70))
                .required()
                .group("entry")
                .order(2)
                .config(
                    FieldConfig::range(50.0, 95.0, 1.0)
                        .with_zone(50.0, 70.0, "#f59e0b", "偏强")
                        .with_zone(70.0, 95.0, "#ef4444", "超买"),
                )
                .constraint(FieldConstraint::new(
                    ConstraintRule::Gt,
                    "rsiOversold",
                    "超买阈值必须高于超卖阈值",
                )),
        )
        .with_field(
            ParamSchemaField::new("rsiOversold", "超卖阈值", ControlType::HeatmapSlider)
                .default_value(json!(30))
                .required()
                .group("entry")
                .order(3)
                .config(
                    FieldConfig::range(5.0, 50.0, 1.0)
                        .with_zone(5.0, 30.0, "#22c55e", "超卖")
                        .with_zone(30.0, 50.0, "#84cc16", "偏弱"),
                ),
        )
        .with_field(
            ParamSchemaField::computed(
                "rsiBandWidth",
                "信号区间宽度",
                "rsiOverbought - rsiOversold",
                &["rsiOverbought", "rsiOversold"],
            )
            .group("entry")
            .order(4),
        )
        .with_field(
            ParamSchemaField::new("stopLossPercent", "止损比例", ControlType::Slider)
                .default_value(json!(5))
                .group("risk")
                .order(1)
                .config(FieldConfig::range(0.5, 50.0, 0.5).with_unit("%")),
        )
        .with_field(
            ParamSchemaField::new("takeProfitPercent", "止盈比例", ControlType::Slider)
                .default_value(json!(10))
                .group("risk")
                .order(2)
                .config(FieldConfig::range(0.5, 100.0, 0.5).with_unit("%")),
        )
        .with_field(
            ParamSchemaField::computed(
                "riskRewardRatio",
                "风险收益比",
                "toFixed(takeProfitPercent / stopLossPercent, 2)",
                &["takeProfitPercent", "stopLossPercent"],
            )
            .group("risk")
            .order(3)
            .config(FieldConfig::default().with_precision(2)),
        )
        .with_field(
            ParamSchemaField::new("trailingStop", "移动止损", ControlType::Toggle)
                .default_value(json!(false))
                .advanced()
                .group("advanced")
                .order(1),
        )
        .with_field(
            ParamSchemaField::new("trailingPercent", "回撤比例", ControlType::Slider)
                .default_value(json!(2))
                .advanced()
                .group("advanced")
                .order(2)
                .config(FieldConfig::range(0.5, 20.0, 0.5).with_unit("%"))
                .show_when("trailingStop === true"),
        )
        .with_validator(SchemaValidator::error(
            "rsiThresholdsValid",
            "rsiOverbought - rsiOversold >= 20",
            "超买阈值必须比超卖阈值至少高 20",
        ))
        .with_validator(SchemaValidator::warning(
            "rsiRangeValid",
            "rsiOversold >= 10 && rsiOverbought <= 90",
            "RSI 阈值设置过于极端，信号可能很少",
        ))
        .with_validator(SchemaValidator::warning(
            "riskRewardHealthy",
            "riskRewardRatio >= 1",
            "止盈比例低于止损比例，风险收益比不佳",
        ))
}
